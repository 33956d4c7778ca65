//! Runtime values produced by evaluating script expressions.

/// A value in argument position: the result of evaluating an [`Expr`].
///
/// [`Expr`]: crate::script::Expr
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
    Nil,
}

impl Value {
    /// The string form used for interpolation and display.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(" "),
            Value::Map(pairs) => pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v.display()))
                .collect::<Vec<_>>()
                .join(", "),
            Value::Nil => String::new(),
        }
    }

    /// Borrow the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a list of strings into `Vec<String>`; `None` if this is not
    /// a list or any element is not a string.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            Value::List(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    /// Coerce arguments to the display-string list used for step logging
    /// and cache keys: lists flatten into their elements, map entries render
    /// as `k: v`, nil disappears.
    pub fn display_args(args: &[Value]) -> Vec<String> {
        let mut out = Vec::new();
        for value in args {
            match value {
                Value::List(items) => out.extend(items.iter().map(Value::display)),
                Value::Map(pairs) => {
                    out.extend(pairs.iter().map(|(k, v)| format!("{}: {}", k, v.display())))
                }
                Value::Nil => {}
                other => out.push(other.display()),
            }
        }
        out
    }
}
