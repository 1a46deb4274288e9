//! Minimal element selectors.
//!
//! Supports what injected engines actually use to find their targets: a
//! comma-separated list of compounds made of an optional tag name and any
//! number of attribute tests (`[attr]`, `[attr="v"]`, `[attr^="v"]`).
//! Combinators are rejected, and attribute values may not contain `]`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Selector parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Empty selector")]
    Empty,

    #[error("Unterminated attribute test in '{0}'")]
    Unterminated(String),

    #[error("Unsupported selector syntax in '{0}'")]
    Unsupported(String),

    #[error("Missing attribute name in '{0}'")]
    MissingAttribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrTest {
    Present(String),
    Equals(String, String),
    Prefix(String, String),
}

impl AttrTest {
    fn matches<'a>(&self, lookup: &impl Fn(&str) -> Option<&'a str>) -> bool {
        match self {
            Self::Present(name) => lookup(name).is_some(),
            Self::Equals(name, value) => lookup(name) == Some(value.as_str()),
            Self::Prefix(name, prefix) => lookup(name).is_some_and(|v| v.starts_with(prefix.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    attrs: Vec<AttrTest>,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Compound>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let alternatives = input
            .split(',')
            .map(parse_compound)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: input.trim().to_string(),
            alternatives,
        })
    }

    /// Test an element given its tag and an attribute lookup.
    pub fn matches<'a>(&self, tag: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> bool {
        self.alternatives.iter().any(|compound| {
            let tag_ok = compound
                .tag
                .as_deref()
                .is_none_or(|t| t.eq_ignore_ascii_case(tag));
            tag_ok && compound.attrs.iter().all(|test| test.matches(&lookup))
        })
    }

    /// The selector as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_compound(src: &str) -> Result<Compound, SelectorError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(SelectorError::Empty);
    }

    let (tag_part, mut rest) = match src.find('[') {
        Some(i) => (&src[..i], &src[i..]),
        None => (src, ""),
    };

    if !tag_part
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '*')
    {
        return Err(SelectorError::Unsupported(src.to_string()));
    }
    let tag = match tag_part {
        "" | "*" => None,
        t => Some(t.to_ascii_lowercase()),
    };

    let mut attrs = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(SelectorError::Unsupported(src.to_string()));
        }
        let end = rest
            .find(']')
            .ok_or_else(|| SelectorError::Unterminated(src.to_string()))?;
        attrs.push(parse_attr(&rest[1..end], src)?);
        rest = &rest[end + 1..];
    }

    Ok(Compound { tag, attrs })
}

fn parse_attr(body: &str, src: &str) -> Result<AttrTest, SelectorError> {
    let test = if let Some(i) = body.find("^=") {
        AttrTest::Prefix(body[..i].trim().to_string(), unquote(&body[i + 2..]))
    } else if let Some(i) = body.find('=') {
        AttrTest::Equals(body[..i].trim().to_string(), unquote(&body[i + 1..]))
    } else {
        AttrTest::Present(body.trim().to_string())
    };

    let name = match &test {
        AttrTest::Present(n) | AttrTest::Equals(n, _) | AttrTest::Prefix(n, _) => n,
    };
    if name.is_empty() {
        return Err(SelectorError::MissingAttribute(src.to_string()));
    }
    Ok(test)
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}
