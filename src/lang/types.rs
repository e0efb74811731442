use std::fmt;

/// The type lattice of the language.
///
/// `Unknown` only exists while the checker is running; it is the
/// placeholder an expression carries before (or while) its type is being
/// inferred. The checker never lets it escape into an accepted program.
#[derive(Debug, Clone)]
pub enum Type {
    Unknown,
    Int,
    Number,
    Bool,
    Str,
    /// The opaque handle an object literal produces. Nothing can be done
    /// with one beyond binding and identity comparison.
    Object,
    /// Homogeneous one-dimensional array.
    Array(Box<Type>),
    /// Signature of a named function. The parser never produces these for
    /// values; the checker uses them for its function table.
    Function(Box<FunctionType>),
}

#[derive(Debug, Clone)]
pub struct FunctionType {
    pub params: Vec<Type>,
    /// `None` for functions that return no value.
    pub ret: Option<Type>,
}

impl Type {
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Number)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    /// Element type of an array, if this is one.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Strict structural equality. `Unknown` compares equal to nothing,
    /// itself included.
    pub fn compare(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Int, Type::Int)
            | (Type::Number, Type::Number)
            | (Type::Bool, Type::Bool)
            | (Type::Str, Type::Str)
            | (Type::Object, Type::Object) => true,
            (Type::Array(a), Type::Array(b)) => a.compare(b),
            (Type::Function(a), Type::Function(b)) => a.compare(b),
            _ => false,
        }
    }

    /// Lenient counterpart of `compare`: `Unknown` on either side
    /// matches anything, and arrays recurse. Together the two relations
    /// pin down how `Unknown` sits in the lattice. The checker resolves
    /// placeholders through type hints before it ever compares, so all
    /// of its checks use the strict `compare`.
    pub fn compatible(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Array(a), Type::Array(b)) => a.compatible(b),
            _ => self.compare(other),
        }
    }
}

impl FunctionType {
    fn compare(&self, other: &FunctionType) -> bool {
        if self.params.len() != other.params.len() {
            return false;
        }
        match (&self.ret, &other.ret) {
            (Some(a), Some(b)) if !a.compare(b) => return false,
            (Some(_), None) | (None, Some(_)) => return false,
            _ => {}
        }
        self.params
            .iter()
            .zip(other.params.iter())
            .all(|(a, b)| a.compare(b))
    }
}

impl fmt::Display for Type {
    /// Formats a type in source syntax (`[]int`, `[][]number`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => write!(f, "<unknown>"),
            Type::Int => write!(f, "int"),
            Type::Number => write!(f, "number"),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "string"),
            Type::Object => write!(f, "object"),
            Type::Array(element) => write!(f, "[]{}", element),
            Type::Function(func) => {
                write!(f, "func(")?;
                for (i, param) in func.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ")")?;
                if let Some(ret) = &func.ret {
                    write!(f, " {}", ret)?;
                }
                Ok(())
            }
        }
    }
}
