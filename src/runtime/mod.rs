//! Runtime specialization and autotuning.
//!
//! A [`Function`] owns every kernel compiled from one source text under
//! the cartesian product of its [`OptionsSpace`], plus a cache mapping
//! invocation signatures to the benchmarked winner. Candidate compiles
//! are independent and run in parallel; benchmarking is serialized on
//! the caller's stream because overlapping launches invalidate the
//! wall-clock comparison.

pub mod bench;

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::codegen;
use crate::driver::{Device, Frontend, Grid, KernelHandle, Stream};
use crate::error::{Error, Result};
use crate::ir::{ParamAttr, Ty};

// ─── Argument ABI ─────────────────────────────────────────────────

/// The closed set of argument-passing tags. Anything the IR can type
/// but this set cannot express is rejected before code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
    Buffer,
}

impl ArgType {
    pub fn convert(ty: &Ty) -> Result<ArgType> {
        Ok(match ty {
            Ty::Bool => ArgType::Bool,
            Ty::I8 => ArgType::I8,
            Ty::I16 => ArgType::I16,
            Ty::I32 => ArgType::I32,
            Ty::I64 => ArgType::I64,
            Ty::U8 => ArgType::U8,
            Ty::U16 => ArgType::U16,
            Ty::U32 => ArgType::U32,
            Ty::U64 => ArgType::U64,
            Ty::F16 => ArgType::F16,
            Ty::F32 => ArgType::F32,
            Ty::F64 => ArgType::F64,
            Ty::Ptr(_) => ArgType::Buffer,
            other => return Err(Error::UnknownType(other.to_string())),
        })
    }

    pub fn size_bytes(self) -> usize {
        match self {
            ArgType::Bool | ArgType::I8 | ArgType::U8 => 1,
            ArgType::I16 | ArgType::U16 | ArgType::F16 => 2,
            ArgType::I32 | ArgType::U32 | ArgType::F32 => 4,
            ArgType::I64 | ArgType::U64 | ArgType::F64 | ArgType::Buffer => 8,
        }
    }
}

// ─── DSL preamble ─────────────────────────────────────────────────

/// The standard-library surface prepended verbatim to every kernel
/// source before the front end runs.
pub fn preamble() -> &'static str {
    r#"#define bool _Bool
#define true 1
#define false 0
#define __readonly      __attribute__((readonly))
#define __writeonly     __attribute__((writeonly))
#define __noalias       __attribute__((noalias))
#define __aligned(A)    __attribute__((aligned(A)))
#define __multipleof(A) __attribute__((multipleof(A)))
#define __retune        __attribute__((retune))
typedef char int8;
typedef short int16;
typedef int int32;
typedef long int64;
typedef unsigned char uint8;
typedef unsigned short uint16;
typedef unsigned int uint32;
typedef unsigned long uint64;
extern int get_program_id(int);
extern int get_num_programs(int);
extern int select(bool, int, int);
extern int atomic_cas(int*, int, int);
extern int atomic_xchg(int*, int);
#define PASTER(a, b, _) a ## _ ## b
#define EVALUATOR(a, b, _)  PASTER(a, b, _)
#define atomic_add(TYPE, TM, TN) EVALUATOR(atomic_add, EVALUATOR(TYPE, EVALUATOR(TM, TN, x), _), _)
#define DECLARATION(TYPE, TM, TN) extern void atomic_add(TYPE, TM, TN)(TYPE*[TM, TN], TYPE[TM, TN], bool[TM, TN])
extern void atomic_add_float_1x1(float*, float, bool);
DECLARATION(float, 64, 64);
DECLARATION(float, 64, 128);
DECLARATION(float, 128, 64);
DECLARATION(float, 128, 128);
extern void atomic_add_half_1x1(half*, half, bool);
DECLARATION(half, 64, 64);
DECLARATION(half, 64, 128);
DECLARATION(half, 128, 64);
DECLARATION(half, 128, 128);
"#
}

// ─── Options ──────────────────────────────────────────────────────

/// One fully determined specialization: a warp count and the textual
/// macro substitutions handed to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub num_warps: u32,
    pub defines: Vec<(String, String)>,
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[num_warps: {}", self.num_warps)?;
        for (name, value) in &self.defines {
            write!(f, ", {}: {}", name, value)?;
        }
        write!(f, "]")
    }
}

/// The tuning surface: candidate warp counts and candidate values per
/// macro. The declaration order of `defines` fixes the enumeration
/// order, which is an observable contract — it decides which candidate
/// compiles first and which wins benchmark ties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsSpace {
    pub num_warps: Vec<u32>,
    pub defines: Vec<(String, Vec<String>)>,
}

impl OptionsSpace {
    /// Cartesian product, `num_warps` outermost, then defines in
    /// declaration order (later defines vary fastest).
    pub fn enumerate(&self) -> Vec<Options> {
        let warps: &[u32] = if self.num_warps.is_empty() {
            &[4]
        } else {
            &self.num_warps
        };
        let mut out = Vec::new();
        for &num_warps in warps {
            let mut partials: Vec<Vec<(String, String)>> = vec![Vec::new()];
            for (name, candidates) in &self.defines {
                let mut next = Vec::with_capacity(partials.len() * candidates.len());
                for partial in &partials {
                    for value in candidates {
                        let mut p = partial.clone();
                        p.push((name.clone(), value.clone()));
                        next.push(p);
                    }
                }
                partials = next;
            }
            for defines in partials {
                out.push(Options { num_warps, defines });
            }
        }
        out
    }
}

// ─── Kernel ───────────────────────────────────────────────────────

/// One compiled, launchable specialization. Immutable after build.
pub struct Kernel {
    handle: Box<dyn KernelHandle>,
    signature: Vec<ArgType>,
    /// Size-aligned byte offset of each argument in the packed buffer.
    offsets: Vec<usize>,
    /// Parameter indices whose runtime values key the autotune cache.
    retune: Vec<usize>,
    opt: Options,
}

impl Kernel {
    /// Preamble + source through the front end, the pass pipeline, the
    /// budget check and backend code generation.
    pub fn build(
        src: &str,
        opt: Options,
        device: &dyn Device,
        frontend: &dyn Frontend,
    ) -> Result<Kernel> {
        let source = format!("{}{}", preamble(), src);
        let mut module = frontend
            .lower(&source, &opt.defines)
            .map_err(Error::Frontend)?;
        let caps = device.caps();
        let meta = codegen::optimize(&mut module, &caps, opt.num_warps)?;

        let entry = module.entry();
        let mut signature = Vec::with_capacity(entry.params.len());
        let mut offsets = Vec::with_capacity(entry.params.len());
        let mut retune = Vec::new();
        let mut offset = 0usize;
        for (i, &p) in entry.params.iter().enumerate() {
            let arg = ArgType::convert(entry.ty(p))?;
            let size = arg.size_bytes();
            offset = offset.next_multiple_of(size);
            if entry.param_has_attr(i, ParamAttr::Retune) && arg != ArgType::Buffer {
                retune.push(i);
            }
            signature.push(arg);
            offsets.push(offset);
            offset += size;
        }

        let label = format!(
            "{}-{}",
            entry.name,
            &blake3::hash(source.as_bytes()).to_hex()[..16]
        );
        debug!("building kernel {} with {}", label, opt);
        let handle = device.codegen(&module, &meta, &opt, &label)?;
        Ok(Kernel {
            handle,
            signature,
            offsets,
            retune,
            opt,
        })
    }

    pub fn options(&self) -> &Options {
        &self.opt
    }

    pub fn signature(&self) -> &[ArgType] {
        &self.signature
    }

    pub fn arg_offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Enqueue one launch. Grids of rank 1 or 2 are padded with
    /// trailing 1s; rank above 3 is rejected before any submission.
    pub fn launch(&self, args: &[u8], grid: &[u64], stream: &dyn Stream) -> Result<()> {
        if grid.len() > 3 {
            return Err(Error::GridRankExceeded(grid.len()));
        }
        let mut padded: Grid = [1; 3];
        padded[..grid.len()].copy_from_slice(grid);
        let block = [self.opt.num_warps * 32, 1, 1];
        self.handle.launch(args, padded, block, stream)
    }

    /// The cache key of one invocation: the runtime values of the
    /// retunable scalar arguments, zero-extended from the packed buffer.
    fn invocation_key(&self, args: &[u8]) -> Vec<u64> {
        self.retune
            .iter()
            .map(|&i| {
                let size = self.signature[i].size_bytes();
                let off = self.offsets[i];
                let mut word = [0u8; 8];
                if let Some(bytes) = args.get(off..off + size) {
                    word[..size].copy_from_slice(bytes);
                }
                u64::from_le_bytes(word)
            })
            .collect()
    }
}

// ─── Function ─────────────────────────────────────────────────────

/// Every surviving specialization of one kernel source, plus the
/// per-signature winner cache. Unbounded, never evicted.
pub struct Function {
    kernels: Vec<Kernel>,
    cache: Mutex<HashMap<Vec<u64>, usize>>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field(
                "options",
                &self.kernels.iter().map(Kernel::options).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Function {
    /// Compile the whole options space. Per-candidate failures are
    /// collected, never abort the loop, and surface only in the
    /// aggregate report when zero candidates survive.
    pub fn build(
        src: &str,
        space: &OptionsSpace,
        device: &dyn Device,
        frontend: &dyn Frontend,
    ) -> Result<Function> {
        let candidates = space.enumerate();
        let results: Vec<(Options, Result<Kernel>)> = candidates
            .into_par_iter()
            .map(|opt| (opt.clone(), Kernel::build(src, opt, device, frontend)))
            .collect();

        let mut kernels = Vec::new();
        let mut failures = Vec::new();
        for (opt, result) in results {
            match result {
                Ok(kernel) => kernels.push(kernel),
                Err(err) => failures.push((opt, err)),
            }
        }
        if kernels.is_empty() {
            let report = failures
                .iter()
                .map(|(opt, err)| format!("{} -> {}", opt, err))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::NoValidConfiguration(report));
        }
        info!(
            "{} of {} configurations compiled",
            kernels.len(),
            kernels.len() + failures.len()
        );
        Ok(Function {
            kernels,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn num_kernels(&self) -> usize {
        self.kernels.len()
    }

    /// Surviving kernels in cartesian-product order.
    pub fn kernels(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.iter()
    }

    /// Select a kernel for this invocation and launch it. `grid` maps
    /// the chosen options to a concrete launch grid.
    pub fn invoke(
        &self,
        args: &[u8],
        grid: &dyn Fn(&Options) -> Vec<u64>,
        stream: &dyn Stream,
    ) -> Result<()> {
        let idx = self.autotune(args, grid, stream)?;
        let kernel = &self.kernels[idx];
        kernel.launch(args, &grid(kernel.options()), stream)
    }

    /// Pick the kernel for this argument signature: fast path for a
    /// single survivor, otherwise cached-or-benchmarked.
    pub fn autotune(
        &self,
        args: &[u8],
        grid: &dyn Fn(&Options) -> Vec<u64>,
        stream: &dyn Stream,
    ) -> Result<usize> {
        if self.kernels.len() == 1 {
            return Ok(0);
        }
        let key = self.kernels[0].invocation_key(args);
        // One exclusive section around lookup-or-insert; contention is
        // limited to the first call per signature.
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&idx) = cache.get(&key) {
            return Ok(idx);
        }

        let mut best = 0usize;
        let mut best_time = None;
        for (i, kernel) in self.kernels.iter().enumerate() {
            let time = bench::bench(
                || kernel.launch(args, &grid(kernel.options()), stream),
                stream,
            )?;
            debug!("candidate {} {}: {:?}", i, kernel.options(), time);
            // Strict minimum: ties keep the earlier candidate.
            if best_time.map_or(true, |t| time < t) {
                best = i;
                best_time = Some(time);
            }
        }
        stream.synchronize()?;
        info!(
            "selected {} for key {:?}",
            self.kernels[best].options(),
            key
        );
        cache.insert(key, best);
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_product_order() {
        let space = OptionsSpace {
            num_warps: vec![2, 4],
            defines: vec![
                ("TM".into(), vec!["64".into(), "128".into()]),
                ("TN".into(), vec!["32".into()]),
            ],
        };
        let all = space.enumerate();
        assert_eq!(all.len(), 4);
        // num_warps outermost, earlier defines vary slower.
        assert_eq!(all[0].num_warps, 2);
        assert_eq!(all[0].defines[0].1, "64");
        assert_eq!(all[1].num_warps, 2);
        assert_eq!(all[1].defines[0].1, "128");
        assert_eq!(all[2].num_warps, 4);
        assert_eq!(all[3].defines, vec![
            ("TM".to_string(), "128".to_string()),
            ("TN".to_string(), "32".to_string()),
        ]);
    }

    #[test]
    fn test_empty_space_defaults_one_candidate() {
        let all = OptionsSpace::default().enumerate();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].num_warps, 4);
        assert!(all[0].defines.is_empty());
    }

    #[test]
    fn test_arg_type_conversion() {
        assert_eq!(ArgType::convert(&Ty::I32).unwrap(), ArgType::I32);
        assert_eq!(ArgType::convert(&Ty::ptr(Ty::F16)).unwrap(), ArgType::Buffer);
        assert!(matches!(
            ArgType::convert(&Ty::Void),
            Err(Error::UnknownType(_))
        ));
        assert!(matches!(
            ArgType::convert(&Ty::tile(Ty::F32, &[64])),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn test_options_report_line() {
        let opt = Options {
            num_warps: 8,
            defines: vec![("TM".into(), "128".into())],
        };
        assert_eq!(opt.to_string(), "[num_warps: 8, TM: 128]");
    }

    #[test]
    fn test_preamble_covers_attribute_macros() {
        let p = preamble();
        for attr in [
            "__readonly",
            "__writeonly",
            "__noalias",
            "__aligned",
            "__multipleof",
            "__retune",
        ] {
            assert!(p.contains(attr), "missing {attr}");
        }
        assert!(p.contains("get_program_id"));
    }

    #[test]
    fn test_preamble_atomic_add_matrix() {
        let p = preamble();
        assert!(p.contains("atomic_add_float_1x1"));
        assert!(p.contains("atomic_add_half_1x1"));
        for ty in ["float", "half"] {
            for tm in [64, 128] {
                for tn in [64, 128] {
                    let decl = format!("DECLARATION({ty}, {tm}, {tn});");
                    assert!(p.contains(&decl), "missing {decl}");
                }
            }
        }
    }
}
