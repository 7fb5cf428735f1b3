//! The C type system
//!
//! A small, closed set of C99 types plus the pure operations the rest of the
//! compiler needs on them: integer promotion, the usual arithmetic
//! conversions, array-to-pointer decay, and struct/array layout.
//!
//! Nothing here touches the AST or the scope manager - every function takes
//! `CType`s (or pairs of them) and returns a `CType`, a `bool`, or a layout.

use std::fmt;

/// Signedness of an integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// Integer width, ordered by C99 integer rank (6.3.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth {
    Char,
    Short,
    Int,
    Long,
    LongLong,
}

/// Floating-point width, ordered by conversion rank (6.3.1.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatWidth {
    Float,
    Double,
    LongDouble,
}

/// The extent of an array type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayExtent {
    /// `T a[N]` with a compile-time-constant N.
    Fixed(u64),
    /// `T a[n]` with a runtime expression; carries the node id of that
    /// expression so the emitter can re-evaluate it at the declaration site.
    Variable(usize),
    /// `T a[]`, only legal as a function parameter (decays to `T*`).
    Incomplete,
}

/// A field of a struct type, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: CType,
    pub offset: u64,
}

/// A C type.
#[derive(Debug, Clone, PartialEq)]
pub enum CType {
    Void,
    Bool,
    Int {
        signedness: Signedness,
        width: IntWidth,
    },
    Float(FloatWidth),
    /// Declared but never produced by the emitter - the language subset this
    /// compiler accepts has no address-of or pointer-arithmetic operators,
    /// so the only pointers that exist are parameter types produced by array
    /// decay.
    Pointer(Box<CType>),
    Array {
        element: Box<CType>,
        extent: ArrayExtent,
    },
    Struct {
        name: Option<String>,
        fields: Vec<Field>,
        size: u64,
        align: u64,
    },
    Function {
        ret: Box<CType>,
        params: Vec<CType>,
        variadic: bool,
    },
}

impl CType {
    pub fn int() -> CType {
        CType::Int {
            signedness: Signedness::Signed,
            width: IntWidth::Int,
        }
    }

    pub fn uint() -> CType {
        CType::Int {
            signedness: Signedness::Unsigned,
            width: IntWidth::Int,
        }
    }

    pub fn char() -> CType {
        CType::Int {
            signedness: Signedness::Signed,
            width: IntWidth::Char,
        }
    }

    pub fn long() -> CType {
        CType::Int {
            signedness: Signedness::Signed,
            width: IntWidth::Long,
        }
    }

    pub fn double() -> CType {
        CType::Float(FloatWidth::Double)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, CType::Int { .. } | CType::Bool)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, CType::Float(_))
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_floating()
    }

    pub fn is_scalar(&self) -> bool {
        self.is_arithmetic() || matches!(self, CType::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, CType::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, CType::Struct { .. })
    }

    /// True if a value of type `src` may be assigned into an lvalue of type
    /// `self` (the spec's `is_lvalue_compatible_assign(dst, src)`, read as
    /// `dst.accepts_assignment_from(src)`).
    ///
    /// Arithmetic types convert into each other freely (the emitter inserts
    /// the conversion snippet); everything else requires an identical type.
    pub fn accepts_assignment_from(&self, src: &CType) -> bool {
        if self.is_arithmetic() && src.is_arithmetic() {
            return true;
        }
        self == src
    }

    fn int_rank(&self) -> IntWidth {
        match self {
            CType::Bool => IntWidth::Char,
            CType::Int { width, .. } => *width,
            _ => panic!("int_rank called on non-integer type {self:?}"),
        }
    }

    fn float_rank(&self) -> FloatWidth {
        match self {
            CType::Float(w) => *w,
            _ => panic!("float_rank called on non-float type {self:?}"),
        }
    }

    /// The mangled type-name fragment used in snippet symbol names
    /// (`add__int__int__int`, `cnv___Bool__int`, ...).
    pub fn mangled(&self) -> String {
        match self {
            CType::Void => "void".to_string(),
            CType::Bool => "_Bool".to_string(),
            CType::Int { signedness, width } => {
                let base = match width {
                    IntWidth::Char => "char",
                    IntWidth::Short => "short",
                    IntWidth::Int => "int",
                    IntWidth::Long => "long",
                    IntWidth::LongLong => "longlong",
                };
                match signedness {
                    Signedness::Signed => base.to_string(),
                    Signedness::Unsigned => format!("u{base}"),
                }
            }
            CType::Float(w) => match w {
                FloatWidth::Float => "float".to_string(),
                FloatWidth::Double => "double".to_string(),
                FloatWidth::LongDouble => "longdouble".to_string(),
            },
            CType::Pointer(_) => "ptr".to_string(),
            CType::Array { element, .. } => format!("arr_{}", element.mangled()),
            CType::Struct { name, .. } => format!("struct_{}", name.as_deref().unwrap_or("anon")),
            CType::Function { .. } => "fn".to_string(),
        }
    }

    /// The textual LLVM type this CType lowers to.
    pub fn llvm_type(&self) -> String {
        match self {
            CType::Void => "void".to_string(),
            CType::Bool => "i1".to_string(),
            CType::Int { width, .. } => match width {
                IntWidth::Char => "i8".to_string(),
                IntWidth::Short => "i16".to_string(),
                IntWidth::Int => "i32".to_string(),
                IntWidth::Long | IntWidth::LongLong => "i64".to_string(),
            },
            CType::Float(w) => match w {
                FloatWidth::Float => "float".to_string(),
                FloatWidth::Double => "double".to_string(),
                FloatWidth::LongDouble => "x86_fp80".to_string(),
            },
            CType::Pointer(_) => "ptr".to_string(),
            CType::Array { .. } => "ptr".to_string(),
            CType::Struct { name, .. } => format!("%struct.{}", name.as_deref().unwrap_or("anon")),
            CType::Function { .. } => "ptr".to_string(),
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Bool => write!(f, "_Bool"),
            CType::Int { signedness, width } => {
                if *signedness == Signedness::Unsigned {
                    write!(f, "unsigned ")?;
                }
                match width {
                    IntWidth::Char => write!(f, "char"),
                    IntWidth::Short => write!(f, "short"),
                    IntWidth::Int => write!(f, "int"),
                    IntWidth::Long => write!(f, "long"),
                    IntWidth::LongLong => write!(f, "long long"),
                }
            }
            CType::Float(FloatWidth::Float) => write!(f, "float"),
            CType::Float(FloatWidth::Double) => write!(f, "double"),
            CType::Float(FloatWidth::LongDouble) => write!(f, "long double"),
            CType::Pointer(inner) => write!(f, "{inner}*"),
            CType::Array { element, extent } => match extent {
                ArrayExtent::Fixed(n) => write!(f, "{element}[{n}]"),
                ArrayExtent::Variable(_) | ArrayExtent::Incomplete => write!(f, "{element}[]"),
            },
            CType::Struct { name, .. } => {
                write!(f, "struct {}", name.as_deref().unwrap_or("<anon>"))
            }
            CType::Function { ret, params, .. } => {
                write!(f, "{ret} (")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Widen any integer type ranked below `int` to `int` (or `unsigned int` if
/// `int` cannot represent all its values) - C99 6.3.1.1p2.
pub fn promote_integer(t: &CType) -> CType {
    match t {
        CType::Bool => CType::int(),
        CType::Int { width, .. } if *width < IntWidth::Int => CType::int(),
        other => other.clone(),
    }
}

/// The usual arithmetic conversions (C99 6.3.1.8), applied to two operands
/// that have already been through integer promotion.
pub fn usual_arithmetic(a: &CType, b: &CType) -> CType {
    let a = promote_integer(a);
    let b = promote_integer(b);

    if a.is_floating() || b.is_floating() {
        return match (a.is_floating(), b.is_floating()) {
            (true, true) => {
                if a.float_rank() >= b.float_rank() {
                    a
                } else {
                    b
                }
            }
            (true, false) => a,
            (false, true) => b,
            (false, false) => unreachable!(),
        };
    }

    let (a_rank, a_sign) = match &a {
        CType::Int { signedness, width } => (*width, *signedness),
        _ => unreachable!("promote_integer yields CType::Int for every non-float operand"),
    };
    let (b_rank, b_sign) = match &b {
        CType::Int { signedness, width } => (*width, *signedness),
        _ => unreachable!("promote_integer yields CType::Int for every non-float operand"),
    };

    if a_sign == b_sign {
        return if a_rank >= b_rank { a } else { b };
    }

    // Different signedness: the unsigned operand wins outright if its rank
    // is >= the signed operand's rank; otherwise the signed type wins
    // because it can represent every value of the narrower unsigned type.
    let (unsigned_ty, unsigned_rank, signed_ty, signed_rank) = if a_sign == Signedness::Unsigned {
        (a, a_rank, b, b_rank)
    } else {
        (b, b_rank, a, a_rank)
    };
    if unsigned_rank >= signed_rank {
        unsigned_ty
    } else {
        signed_ty
    }
}

/// Array-to-pointer decay, applied to non-lvalue contexts and to
/// function-parameter types (C99 6.3.2.1p3 / 6.7.5.3p7).
pub fn array_to_pointer(t: &CType) -> CType {
    match t {
        CType::Array { element, .. } => CType::Pointer(element.clone()),
        other => other.clone(),
    }
}

/// Size and alignment of a type in bytes, per the target data layout
/// `e-m:e-i64:64-f80:128-n8:16:32:64-S128` (little endian, 64-bit pointers,
/// natural alignment up to the target word).
pub fn layout(t: &CType) -> (u64, u64) {
    match t {
        CType::Void => (0, 1),
        CType::Bool => (1, 1),
        CType::Int { width, .. } => match width {
            IntWidth::Char => (1, 1),
            IntWidth::Short => (2, 2),
            IntWidth::Int => (4, 4),
            IntWidth::Long | IntWidth::LongLong => (8, 8),
        },
        CType::Float(w) => match w {
            FloatWidth::Float => (4, 4),
            FloatWidth::Double => (8, 8),
            FloatWidth::LongDouble => (16, 16),
        },
        CType::Pointer(_) | CType::Function { .. } => (8, 8),
        CType::Array { element, extent } => {
            let (esize, ealign) = layout(element);
            let n = match extent {
                ArrayExtent::Fixed(n) => *n,
                ArrayExtent::Variable(_) | ArrayExtent::Incomplete => 0,
            };
            (esize * n, ealign)
        }
        CType::Struct { size, align, .. } => (*size, *align),
    }
}

/// Compute the size, alignment, and field offsets of a struct from its
/// fields' declared types (in source order): each field lands at the
/// smallest offset >= the current offset with `offset % field.align == 0`;
/// the struct's own size is padded up to a multiple of its alignment (the
/// max of its members' alignments).
pub fn layout_struct(fields: &[(String, CType)]) -> (Vec<Field>, u64, u64) {
    let mut offset = 0u64;
    let mut align = 1u64;
    let mut laid_out = Vec::with_capacity(fields.len());

    for (name, ty) in fields {
        let (fsize, falign) = layout(ty);
        align = align.max(falign);
        if falign > 0 {
            let rem = offset % falign;
            if rem != 0 {
                offset += falign - rem;
            }
        }
        laid_out.push(Field {
            name: name.clone(),
            ty: ty.clone(),
            offset,
        });
        offset += fsize;
    }

    let size = if align > 0 {
        let rem = offset % align;
        if rem != 0 {
            offset + (align - rem)
        } else {
            offset
        }
    } else {
        offset
    };

    (laid_out, size, align)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotes_char_and_short_to_int() {
        assert_eq!(promote_integer(&CType::char()), CType::int());
        assert_eq!(
            promote_integer(&CType::Int {
                signedness: Signedness::Signed,
                width: IntWidth::Short
            }),
            CType::int()
        );
        assert_eq!(promote_integer(&CType::int()), CType::int());
    }

    #[test]
    fn usual_arithmetic_prefers_floating_over_integer() {
        assert_eq!(usual_arithmetic(&CType::int(), &CType::double()), CType::double());
    }

    #[test]
    fn usual_arithmetic_widens_to_common_integer_rank() {
        assert_eq!(usual_arithmetic(&CType::int(), &CType::long()), CType::long());
    }

    #[test]
    fn usual_arithmetic_unsigned_int_beats_signed_int_at_same_rank() {
        assert_eq!(usual_arithmetic(&CType::int(), &CType::uint()), CType::uint());
    }

    #[test]
    fn array_decays_to_pointer_to_element() {
        let arr = CType::Array {
            element: Box::new(CType::int()),
            extent: ArrayExtent::Fixed(10),
        };
        assert_eq!(array_to_pointer(&arr), CType::Pointer(Box::new(CType::int())));
    }

    #[test]
    fn struct_layout_packs_and_pads_fields() {
        // struct { float f; int i1; int i2; int arr[10]; }
        let fields = vec![
            ("f".to_string(), CType::Float(FloatWidth::Float)),
            ("i1".to_string(), CType::int()),
            ("i2".to_string(), CType::int()),
            (
                "arr".to_string(),
                CType::Array {
                    element: Box::new(CType::int()),
                    extent: ArrayExtent::Fixed(10),
                },
            ),
        ];
        let (laid_out, size, align) = layout_struct(&fields);
        assert_eq!(laid_out[0].offset, 0);
        assert_eq!(laid_out[1].offset, 4);
        assert_eq!(laid_out[2].offset, 8);
        assert_eq!(laid_out[3].offset, 12);
        assert_eq!(size, 12 + 40);
        assert_eq!(align, 4);
    }

    #[test]
    fn struct_layout_pads_trailing_to_max_alignment() {
        // struct { char c; long l; } -> c at 0, pad to 8, l at 8, size 16, align 8
        let fields = vec![("c".to_string(), CType::char()), ("l".to_string(), CType::long())];
        let (laid_out, size, align) = layout_struct(&fields);
        assert_eq!(laid_out[0].offset, 0);
        assert_eq!(laid_out[1].offset, 8);
        assert_eq!(size, 16);
        assert_eq!(align, 8);
    }
}
