#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

//! W3C `baggage` header values.
//!
//! A baggage value is a comma-separated list of `key=value` members, each of
//! which may carry `;name[=value]` properties:
//!
//! ```text
//! baggage: k8s.namespace.name=emojivoto;src=proxy, service.name=web%20app
//! ```
//!
//! Parsing is lenient: malformed members are dropped without affecting their
//! neighbors and malformed percent-escapes are kept verbatim.
//!
//! <https://www.w3.org/TR/baggage/>

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::{fmt, slice};
use tracing::debug;

pub const HEADER: &str = "baggage";

/// An ordered list of baggage members.
///
/// Duplicate keys are preserved in the order they were seen.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Baggage(Vec<Entry>);

/// A single `key=value` baggage member.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Entry {
    key: String,
    value: String,
    properties: Vec<Property>,
}

/// Metadata attached to a baggage member after a `;`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Property {
    name: String,
    value: Option<String>,
}

/// Characters that may not appear unescaped in a member value.
const VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

/// Keys and property names additionally may not contain the `=` delimiter.
const KEY: &AsciiSet = &VALUE.add(b'=');

/// Parses a (possibly joined) baggage header value.
///
/// Empty input yields an empty list. Members without a `=` or with an empty
/// key are skipped.
pub fn parse(header_value: &str) -> Baggage {
    header_value
        .split(',')
        .map(trim)
        .filter(|member| !member.is_empty())
        .filter_map(|member| {
            let entry = parse_entry(member);
            if entry.is_none() {
                debug!(%member, "Skipping malformed baggage member");
            }
            entry
        })
        .collect()
}

fn parse_entry(member: &str) -> Option<Entry> {
    let mut parts = member.split(';');
    let (key, value) = parts.next()?.split_once('=')?;
    let key = trim(key);
    if key.is_empty() {
        return None;
    }

    let properties = parts
        .filter_map(|prop| {
            let (name, value) = match prop.split_once('=') {
                Some((name, value)) => (trim(name), Some(decode(trim(value)))),
                None => (trim(prop), None),
            };
            if name.is_empty() {
                return None;
            }
            Some(Property {
                name: decode(name),
                value,
            })
        })
        .collect();

    Some(Entry {
        key: decode(key),
        value: decode(trim(value)),
        properties,
    })
}

/// Strips optional whitespace (`OWS`) around a delimiter.
fn trim(s: &str) -> &str {
    s.trim_matches(|c| c == ' ' || c == '\t')
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

// === impl Baggage ===

impl Baggage {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Entry> {
        self.0.iter()
    }

    /// Returns the value of the last member with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }
}

impl FromIterator<Entry> for Baggage {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Baggage {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Baggage {
    type Item = &'a Entry;
    type IntoIter = slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders the list in header form.
impl fmt::Display for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = self.0.iter();
        if let Some(first) = entries.next() {
            fmt::Display::fmt(first, f)?;
            for entry in entries {
                write!(f, ",{entry}")?;
            }
        }
        Ok(())
    }
}

// === impl Entry ===

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.properties.push(Property {
            name: name.into(),
            value,
        });
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}",
            utf8_percent_encode(&self.key, KEY),
            utf8_percent_encode(&self.value, VALUE)
        )?;
        for prop in &self.properties {
            write!(f, ";{prop}")?;
        }
        Ok(())
    }
}

// === impl Property ===

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&utf8_percent_encode(&self.name, KEY), f)?;
        if let Some(value) = &self.value {
            write!(f, "={}", utf8_percent_encode(value, VALUE))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{quickcheck, TestResult};

    fn pairs(baggage: &Baggage) -> Vec<(&str, &str)> {
        baggage.iter().map(|e| (e.key(), e.value())).collect()
    }

    #[test]
    fn empty() {
        assert!(parse("").is_empty());
        assert!(parse("  \t ").is_empty());
        assert!(parse(",,").is_empty());
    }

    #[test]
    fn members() {
        let baggage = parse("workload.name=foo,workload.namespace=bar");
        assert_eq!(
            pairs(&baggage),
            vec![("workload.name", "foo"), ("workload.namespace", "bar")]
        );
    }

    #[test]
    fn skips_malformed_members() {
        let baggage = parse("a=1,bad,b=2");
        assert_eq!(pairs(&baggage), vec![("a", "1"), ("b", "2")]);

        let baggage = parse("=nokey, =, a=1,  ,b=2");
        assert_eq!(pairs(&baggage), vec![("a", "1"), ("b", "2")]);
    }

    #[test]
    fn trims_whitespace() {
        let baggage = parse(" a = 1 ;\tp = x , b=2\t");
        assert_eq!(pairs(&baggage), vec![("a", "1"), ("b", "2")]);
        let props = baggage.iter().next().unwrap().properties();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name(), "p");
        assert_eq!(props[0].value(), Some("x"));
    }

    #[test]
    fn empty_value() {
        let baggage = parse("a=,b=2");
        assert_eq!(pairs(&baggage), vec![("a", ""), ("b", "2")]);
    }

    #[test]
    fn value_may_contain_equals() {
        let baggage = parse("a=b=c");
        assert_eq!(pairs(&baggage), vec![("a", "b=c")]);
    }

    #[test]
    fn properties() {
        let baggage = parse("a=1;flag;ttl=30;;=x");
        let entry = baggage.iter().next().unwrap();
        let props = entry
            .properties()
            .iter()
            .map(|p| (p.name(), p.value()))
            .collect::<Vec<_>>();
        assert_eq!(props, vec![("flag", None), ("ttl", Some("30"))]);
    }

    #[test]
    fn percent_decodes() {
        let baggage = parse("service.name=web%20app,k%3Dy=%E2%9C%93");
        assert_eq!(pairs(&baggage), vec![("service.name", "web app"), ("k=y", "✓")]);
    }

    #[test]
    fn malformed_escapes_pass_through() {
        let baggage = parse("a=100%,b=%zz,c=%4");
        assert_eq!(pairs(&baggage), vec![("a", "100%"), ("b", "%zz"), ("c", "%4")]);
    }

    #[test]
    fn duplicates_preserved() {
        let baggage = parse("a=1,a=2");
        assert_eq!(pairs(&baggage), vec![("a", "1"), ("a", "2")]);
        assert_eq!(baggage.get("a"), Some("2"));
        assert_eq!(baggage.get("b"), None);
    }

    #[test]
    fn joined_header_lines() {
        let baggage = parse(&["a=1", "b=2"].join(","));
        assert_eq!(pairs(&baggage), vec![("a", "1"), ("b", "2")]);
    }

    #[test]
    fn renders() {
        let baggage = Baggage::from_iter([
            Entry::new("service.name", "web app").with_property("src", None),
            Entry::new("k=y", "a,b;c").with_property("ttl", Some("30".to_string())),
        ]);
        let rendered = baggage.to_string();
        assert_eq!(rendered, "service.name=web%20app;src,k%3Dy=a%2Cb%3Bc;ttl=30");
        assert_eq!(parse(&rendered), baggage);
    }

    quickcheck! {
        fn renders_parseable(entries: Vec<(String, String)>) -> TestResult {
            if entries.iter().any(|(k, _)| k.is_empty()) {
                return TestResult::discard();
            }
            let baggage = entries
                .into_iter()
                .map(|(k, v)| Entry::new(k, v))
                .collect::<Baggage>();
            TestResult::from_bool(parse(&baggage.to_string()) == baggage)
        }

        fn counts_only_valid_members(valid: Vec<(u8, u8)>, junk: u8) -> bool {
            // Interleave a member without a delimiter after each valid one.
            let header = valid
                .iter()
                .map(|(k, v)| format!("k{k}={v},junk{junk}"))
                .collect::<Vec<_>>()
                .join(",");
            parse(&header).len() == valid.len()
        }
    }
}
