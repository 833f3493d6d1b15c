//! Conversion of primitive values between Rust and the script runtime
//!
//! Arguments coming from scripts are read through [`Args`], which produces
//! `bad argument #N to 'Name' (...)` errors in the same shape the Lua standard
//! library uses. Integer arguments are range checked against the target width.

use grimoire_events::ObjectGuid;
use mlua::{Function, Value};

/// Build a script-level argument error
pub fn bad_argument(narg: usize, name: &str, detail: impl std::fmt::Display) -> mlua::Error {
    mlua::Error::runtime(format!("bad argument #{narg} to '{name}' ({detail})"))
}

/// Display name of a possibly missing argument
pub(crate) fn type_name_of(value: Option<&Value>) -> &'static str {
    match value {
        None => "no value",
        Some(v) => v.type_name(),
    }
}

/// Types that can be read from a script argument
pub trait CheckValue: Sized {
    /// Name used in "X expected" messages
    const EXPECTED: &'static str;

    /// Convert `value`, returning the error detail on failure
    fn check_value(value: Option<&Value>) -> Result<Self, String>;
}

fn mismatch<T: CheckValue>(value: Option<&Value>) -> String {
    format!("{} expected, got {}", T::EXPECTED, type_name_of(value))
}

fn integer_value(value: Option<&Value>) -> Result<i128, String> {
    match value {
        Some(Value::Integer(i)) => Ok(*i as i128),
        Some(Value::Number(n)) => {
            if n.is_finite() && n.fract() == 0.0 {
                Ok(*n as i128)
            } else {
                Err("number has no integer representation".to_string())
            }
        }
        Some(Value::String(s)) => {
            let text = s.to_string_lossy();
            let text = text.trim();
            text.parse::<i128>().or_else(|_| match text.parse::<f64>() {
                Ok(n) if n.is_finite() && n.fract() == 0.0 => Ok(n as i128),
                _ => Err(format!("number expected, got {}", type_name_of(value))),
            })
        }
        _ => Err(format!("number expected, got {}", type_name_of(value))),
    }
}

macro_rules! check_integer {
    ($($t:ty),*) => {
        $(
            impl CheckValue for $t {
                const EXPECTED: &'static str = "number";

                fn check_value(value: Option<&Value>) -> Result<Self, String> {
                    let n = integer_value(value)?;
                    if n < <$t>::MIN as i128 {
                        return Err(format!("value must be greater than or equal to {}", <$t>::MIN));
                    }
                    if n > <$t>::MAX as i128 {
                        return Err(format!("value must be less than or equal to {}", <$t>::MAX));
                    }
                    Ok(n as $t)
                }
            }
        )*
    };
}

check_integer!(i8, i16, i32, i64, u8, u16, u32);

/// 64-bit unsigned values travel through the runtime as signed integers
impl CheckValue for u64 {
    const EXPECTED: &'static str = "number";

    fn check_value(value: Option<&Value>) -> Result<Self, String> {
        if let Some(Value::String(s)) = value {
            if let Ok(n) = s.to_string_lossy().trim().parse::<u64>() {
                return Ok(n);
            }
        }

        let n = integer_value(value)?;
        if n < i64::MIN as i128 {
            return Err(format!("value must be greater than or equal to {}", i64::MIN));
        }
        if n > u64::MAX as i128 {
            return Err(format!("value must be less than or equal to {}", u64::MAX));
        }
        if n > i64::MAX as i128 {
            Ok(n as u64)
        } else {
            Ok(n as i64 as u64)
        }
    }
}

impl CheckValue for f64 {
    const EXPECTED: &'static str = "number";

    fn check_value(value: Option<&Value>) -> Result<Self, String> {
        match value {
            Some(Value::Integer(i)) => Ok(*i as f64),
            Some(Value::Number(n)) => Ok(*n),
            Some(Value::String(s)) => s
                .to_string_lossy()
                .trim()
                .parse::<f64>()
                .map_err(|_| mismatch::<Self>(value)),
            _ => Err(mismatch::<Self>(value)),
        }
    }
}

impl CheckValue for f32 {
    const EXPECTED: &'static str = "number";

    fn check_value(value: Option<&Value>) -> Result<Self, String> {
        f64::check_value(value).map(|n| n as f32)
    }
}

/// Any value converts to a boolean: only nil and false are false
impl CheckValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn check_value(value: Option<&Value>) -> Result<Self, String> {
        Ok(!matches!(value, None | Some(Value::Nil) | Some(Value::Boolean(false))))
    }
}

impl CheckValue for String {
    const EXPECTED: &'static str = "string";

    fn check_value(value: Option<&Value>) -> Result<Self, String> {
        match value {
            Some(Value::String(s)) => Ok(s.to_string_lossy()),
            Some(Value::Integer(i)) => Ok(i.to_string()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(mismatch::<Self>(value)),
        }
    }
}

impl CheckValue for ObjectGuid {
    const EXPECTED: &'static str = "number";

    fn check_value(value: Option<&Value>) -> Result<Self, String> {
        u64::check_value(value).map(ObjectGuid)
    }
}

/// 64-bit unsigned values are pushed as their signed reinterpretation
pub fn push_u64(value: u64) -> Value {
    Value::Integer(value as i64)
}

/// Arguments of one native function call
#[derive(Clone, Copy)]
pub struct Args<'a> {
    name: &'static str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(name: &'static str, values: &'a [Value]) -> Self {
        Self { name, values }
    }

    /// Name of the function being called
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Argument `narg`, counting from 1
    pub fn get(&self, narg: usize) -> Option<&'a Value> {
        narg.checked_sub(1).and_then(|i| self.values.get(i))
    }

    /// Whether argument `narg` is absent or nil
    pub fn is_none_or_nil(&self, narg: usize) -> bool {
        matches!(self.get(narg), None | Some(Value::Nil))
    }

    pub fn error(&self, narg: usize, detail: impl std::fmt::Display) -> mlua::Error {
        bad_argument(narg, self.name, detail)
    }

    pub fn check<T: CheckValue>(&self, narg: usize) -> mlua::Result<T> {
        T::check_value(self.get(narg)).map_err(|detail| self.error(narg, detail))
    }

    /// Like [`Args::check`] but absent and nil arguments yield `default`
    pub fn opt<T: CheckValue>(&self, narg: usize, default: T) -> mlua::Result<T> {
        if self.is_none_or_nil(narg) {
            Ok(default)
        } else {
            self.check(narg)
        }
    }

    pub fn function(&self, narg: usize) -> mlua::Result<Function> {
        match self.get(narg) {
            Some(Value::Function(f)) => Ok(f.clone()),
            other => Err(self.error(
                narg,
                format!("function expected, got {}", type_name_of(other)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    fn check<T: CheckValue>(value: Value) -> Result<T, String> {
        T::check_value(Some(&value))
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(check::<u8>(Value::Integer(255)), Ok(255));
        assert_eq!(
            check::<u8>(Value::Integer(256)),
            Err("value must be less than or equal to 255".to_string())
        );
        assert_eq!(
            check::<u32>(Value::Integer(-1)),
            Err("value must be greater than or equal to 0".to_string())
        );
        assert_eq!(
            check::<i8>(Value::Integer(-129)),
            Err("value must be greater than or equal to -128".to_string())
        );
        assert_eq!(check::<i32>(Value::Number(12.0)), Ok(12));
        assert!(check::<i32>(Value::Number(1.5)).is_err());
    }

    #[test]
    fn test_u64_goes_through_signed_integers() {
        assert_eq!(check::<u64>(Value::Integer(-1)), Ok(u64::MAX));
        assert_eq!(check::<u64>(Value::Integer(42)), Ok(42));
        assert_eq!(push_u64(u64::MAX), Value::Integer(-1));
    }

    #[test]
    fn test_strings_and_numbers() {
        let lua = Lua::new();
        let s = Value::String(lua.create_string("17").unwrap());
        assert_eq!(check::<u16>(s.clone()), Ok(17));
        assert_eq!(check::<String>(s), Ok("17".to_string()));
        assert_eq!(check::<String>(Value::Integer(5)), Ok("5".to_string()));
        assert_eq!(
            check::<String>(Value::Boolean(true)),
            Err("string expected, got boolean".to_string())
        );
        assert_eq!(check::<f32>(Value::Integer(2)), Ok(2.0));
    }

    #[test]
    fn test_boolean_truthiness() {
        assert_eq!(bool::check_value(None), Ok(false));
        assert_eq!(check::<bool>(Value::Nil), Ok(false));
        assert_eq!(check::<bool>(Value::Boolean(false)), Ok(false));
        assert_eq!(check::<bool>(Value::Integer(0)), Ok(true));
    }

    #[test]
    fn test_args_error_messages() {
        let values = vec![Value::Integer(300)];
        let args = Args::new("SetLevel", &values);

        let err = args.check::<u8>(1).unwrap_err();
        assert!(err
            .to_string()
            .contains("bad argument #1 to 'SetLevel' (value must be less than or equal to 255)"));

        let err = args.check::<u32>(2).unwrap_err();
        assert!(err.to_string().contains("number expected, got no value"));

        assert_eq!(args.opt::<u32>(2, 7).unwrap(), 7);
        assert!(args.function(1).is_err());
    }
}
