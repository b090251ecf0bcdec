//! Helper functions for [`toml_span`].

use toml_span::{DeserError, value::ValueInner};

use crate::prelude::*;

/// Deserialize a TOML string into a value of the specified type.
pub fn from_toml_str<T>(toml_str: &str) -> Result<T, DeserError>
where
    T: toml_span::Deserialize<'static>,
{
    let mut value = toml_span::de::parse(toml_str)?.into_static_value();
    T::deserialize(&mut value)
}

/// Convert a [`DeserError`] into something we can report with [`anyhow`].
///
/// [`DeserError`] may hold several errors, so we list all of them.
pub fn deser_error_to_anyhow(err: DeserError) -> anyhow::Error {
    let messages = err
        .errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    anyhow!("{}", messages.join("; "))
}

/// Convert a `toml_span::Value<'_>` to a `toml_span::Value<'static>`.
pub trait IntoStaticValue {
    /// Our output type.
    type Output;

    /// Convert to a static value.
    fn into_static_value(self) -> Self::Output;
}

impl IntoStaticValue for toml_span::Value<'_> {
    type Output = toml_span::Value<'static>;

    fn into_static_value(mut self) -> Self::Output {
        let inner = self.take().into_static_value();
        toml_span::Value::with_span(inner, self.span)
    }
}

impl IntoStaticValue for ValueInner<'_> {
    type Output = ValueInner<'static>;

    fn into_static_value(self) -> Self::Output {
        match self {
            ValueInner::String(cow) => ValueInner::String(cow.into_owned().into()),
            ValueInner::Integer(i) => ValueInner::Integer(i),
            ValueInner::Float(f) => ValueInner::Float(f),
            ValueInner::Boolean(b) => ValueInner::Boolean(b),
            ValueInner::Array(values) => {
                let values = values
                    .into_iter()
                    .map(IntoStaticValue::into_static_value)
                    .collect();
                ValueInner::Array(values)
            }
            ValueInner::Table(btree_map) => {
                let btree_map = btree_map
                    .into_iter()
                    .map(|(k, v)| (k.into_static_value(), v.into_static_value()))
                    .collect();
                ValueInner::Table(btree_map)
            }
        }
    }
}

impl IntoStaticValue for toml_span::value::Key<'_> {
    type Output = toml_span::value::Key<'static>;

    fn into_static_value(self) -> Self::Output {
        toml_span::value::Key {
            name: self.name.into_owned().into(),
            span: self.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_reported() {
        let err = from_toml_str::<crate::pali::PaliTermConfig>("terms = [1, 2]")
            .unwrap_err();
        let err = deser_error_to_anyhow(err);
        assert!(!err.to_string().is_empty());
    }
}
