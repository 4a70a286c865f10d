//! IR types: scalars, pointers, and fixed-shape tiles.

use std::fmt;

/// The type of an IR value. `Tile` wraps a scalar or pointer element type
/// with a fixed N-dimensional shape; tiles of tiles are not representable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// Produced by instructions with no result (stores, branches, barriers).
    Void,
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
    Ptr(Box<Ty>),
    Tile(Box<Ty>, Vec<u64>),
}

impl Ty {
    pub fn tile(elem: Ty, shape: &[u64]) -> Ty {
        Ty::Tile(Box::new(elem), shape.to_vec())
    }

    pub fn ptr(elem: Ty) -> Ty {
        Ty::Ptr(Box::new(elem))
    }

    pub fn is_tile(&self) -> bool {
        matches!(self, Ty::Tile(..))
    }

    pub fn is_ptr(&self) -> bool {
        match self {
            Ty::Ptr(_) => true,
            Ty::Tile(elem, _) => elem.is_ptr(),
            _ => false,
        }
    }

    /// The scalar element type: `self` for scalars, the element for tiles.
    pub fn elem(&self) -> &Ty {
        match self {
            Ty::Tile(elem, _) => elem,
            other => other,
        }
    }

    /// Tile shape, or `&[]` for scalars.
    pub fn shape(&self) -> &[u64] {
        match self {
            Ty::Tile(_, shape) => shape,
            _ => &[],
        }
    }

    /// Number of elements (1 for scalars).
    pub fn numel(&self) -> u64 {
        self.shape().iter().product::<u64>().max(1)
    }

    /// Byte size of one scalar element. Pointers are 8 bytes.
    pub fn elem_bytes(&self) -> u64 {
        match self.elem() {
            Ty::Bool | Ty::I8 | Ty::U8 => 1,
            Ty::I16 | Ty::U16 | Ty::F16 => 2,
            Ty::I32 | Ty::U32 | Ty::F32 => 4,
            Ty::I64 | Ty::U64 | Ty::F64 | Ty::Ptr(_) => 8,
            Ty::Void | Ty::Tile(..) => 0,
        }
    }

    /// Total byte size of the value (shape x element size).
    pub fn size_bytes(&self) -> u64 {
        self.numel() * self.elem_bytes()
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Bool => write!(f, "bool"),
            Ty::I8 => write!(f, "i8"),
            Ty::I16 => write!(f, "i16"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::U8 => write!(f, "u8"),
            Ty::U16 => write!(f, "u16"),
            Ty::U32 => write!(f, "u32"),
            Ty::U64 => write!(f, "u64"),
            Ty::F16 => write!(f, "f16"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::Ptr(elem) => write!(f, "*{}", elem),
            Ty::Tile(elem, shape) => {
                write!(f, "{}[", elem)?;
                for (i, d) in shape.iter().enumerate() {
                    if i > 0 {
                        write!(f, "x")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "]")
            }
        }
    }
}
