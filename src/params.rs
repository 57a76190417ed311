use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{GuacError, Result};

/// Substitutes `{name}` placeholders in `template` with percent-encoded values.
///
/// Every placeholder must have a value; unused values are ignored.
pub fn build_path<I, K, V>(template: &str, params: I) -> Result<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let params: Vec<(K, V)> = params.into_iter().collect();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| GuacError::Config(format!("unclosed placeholder in '{template}'")))?;
        let name = &after[..close];
        let value = params
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value.as_ref())
            .ok_or_else(|| GuacError::Config(format!("missing path parameter: {name}")))?;
        out.push_str(&urlencoding::encode(value));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Kind of object addressed by a client URL identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientObjectKind {
    Connection,
    ConnectionGroup,
    ActiveConnection,
}

impl ClientObjectKind {
    fn code(self) -> &'static str {
        match self {
            Self::Connection => "c",
            Self::ConnectionGroup => "g",
            Self::ActiveConnection => "a",
        }
    }
}

/// Encodes the identifier used in `#/client/<id>` URLs.
///
/// The value is base64 of `identifier NUL kind NUL data_source`.
pub fn encode_client_url_token(identifier: &str, kind: ClientObjectKind, data_source: &str) -> String {
    let raw = format!("{identifier}\0{}\0{data_source}", kind.code());
    STANDARD.encode(raw.as_bytes())
}
