//! Distinguished names.
//!
//! A [`Dn`] is parsed from its RFC 4514 string form (`cn=foo,ou=People,
//! dc=example,dc=com`) and carries both the user-supplied form, used for
//! display, and a normalized form, used for equality, hashing and ordering.
//!
//! Normalization rules:
//! - attribute types are trimmed and lower-cased
//! - string values are unescaped, trimmed, inner whitespace runs collapse to
//!   one space, and the result is case-folded
//! - `#`-prefixed BER values are kept verbatim apart from lower-casing
//! - the AVAs of a multi-valued RDN are sorted by normalized type and value
//!
//! Every attribute is compared case-insensitively.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Characters that must be escaped inside an attribute value.
const SPECIAL_CHARS: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '='];

/// One attribute-value assertion of an RDN, e.g. `cn=foo`.
#[derive(Clone, Debug)]
pub struct Ava {
    attr_type: String,
    value: String,
    binary: bool,
    norm_type: String,
    norm_value: String,
}

impl Ava {
    /// Create an AVA from an attribute type and an unescaped string value.
    pub fn new(attr_type: &str, value: &str) -> Result<Self, TypeError> {
        let attr_type = attr_type.trim();
        validate_attr_type(attr_type)
            .map_err(|reason| TypeError::invalid_dn(&format!("{attr_type}={value}"), reason))?;
        Ok(Self::build(attr_type.to_string(), value.to_string(), false))
    }

    fn build(attr_type: String, value: String, binary: bool) -> Self {
        let norm_type = attr_type.to_ascii_lowercase();
        let norm_value = if binary {
            value.to_ascii_lowercase()
        } else {
            normalize_value(&value)
        };
        Self {
            attr_type,
            value,
            binary,
            norm_type,
            norm_value,
        }
    }

    /// The attribute type as supplied.
    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    /// The unescaped value as supplied.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Lower-cased attribute type.
    pub fn normalized_type(&self) -> &str {
        &self.norm_type
    }

    /// Case-folded, whitespace-collapsed value.
    pub fn normalized_value(&self) -> &str {
        &self.norm_value
    }

    fn normalized_key(&self) -> (&str, bool, &str) {
        (&self.norm_type, self.binary, &self.norm_value)
    }

    fn write_normalized(&self, out: &mut String) {
        out.push_str(&self.norm_type);
        out.push('=');
        out.push_str(&escape_value(&self.norm_value, self.binary));
    }
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_key() == other.normalized_key()
    }
}

impl Eq for Ava {}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr_type, escape_value(&self.value, self.binary))
    }
}

/// Relative distinguished name: one level of a [`Dn`].
///
/// Usually a single AVA; multi-valued RDNs (`cn=a+sn=b`) compare equal
/// regardless of the order their AVAs were written in.
#[derive(Clone)]
pub struct Rdn {
    avas: Vec<Ava>,
    normalized: String,
}

impl Rdn {
    /// Build an RDN from one or more AVAs.
    pub fn new(avas: Vec<Ava>) -> Result<Self, TypeError> {
        if avas.is_empty() {
            return Err(TypeError::invalid_dn("", "RDN must contain at least one AVA"));
        }
        Ok(Self::from_avas(avas))
    }

    /// Single-valued RDN.
    pub fn single(attr_type: &str, value: &str) -> Result<Self, TypeError> {
        Ok(Self::from_avas(vec![Ava::new(attr_type, value)?]))
    }

    /// Parse exactly one RDN, e.g. `cn=foo` or `cn=a+sn=b`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let mut rdns = DnParser::new(s).parse()?;
        match rdns.len() {
            1 => Ok(rdns.remove(0)),
            0 => Err(TypeError::invalid_dn(s, "empty RDN")),
            _ => Err(TypeError::invalid_dn(s, "expected a single RDN")),
        }
    }

    fn from_avas(avas: Vec<Ava>) -> Self {
        let mut sorted: Vec<&Ava> = avas.iter().collect();
        sorted.sort_by(|a, b| a.normalized_key().cmp(&b.normalized_key()));
        let mut normalized = String::new();
        for (i, ava) in sorted.into_iter().enumerate() {
            if i > 0 {
                normalized.push('+');
            }
            ava.write_normalized(&mut normalized);
        }
        Self { avas, normalized }
    }

    /// AVAs in the order they were written.
    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// Whether this RDN has more than one AVA.
    pub fn is_multi_valued(&self) -> bool {
        self.avas.len() > 1
    }

    /// Canonical string form; equal RDNs have identical normalized strings.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Rdn {}

impl Hash for Rdn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl PartialOrd for Rdn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rdn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl fmt::Debug for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rdn({self})")
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ava) in self.avas.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{ava}")?;
        }
        Ok(())
    }
}

/// Distinguished name: an immutable sequence of RDNs, leaf first.
///
/// The root DN (empty string) has no RDNs. Ordering is hierarchical: DNs are
/// compared RDN by RDN starting at the root, so an ancestor sorts before all
/// of its descendants and siblings sort by normalized RDN.
#[derive(Clone, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The root DN.
    pub fn root() -> Self {
        Self { rdns: Vec::new() }
    }

    /// Parse an RFC 4514 string. The empty string is the root DN.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        Ok(Self {
            rdns: DnParser::new(s).parse()?,
        })
    }

    /// Build a DN from RDNs given leaf first.
    pub fn from_rdns(rdns: impl IntoIterator<Item = Rdn>) -> Self {
        Self {
            rdns: rdns.into_iter().collect(),
        }
    }

    /// Number of RDNs.
    pub fn size(&self) -> usize {
        self.rdns.len()
    }

    /// Returns `true` for the root DN.
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The leaf RDN, `None` for the root DN.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// RDNs leaf first.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The immediate parent, `None` for the root DN.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Self {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// The DN one level below this one.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Self { rdns }
    }

    /// Returns `true` if `self` equals `base` or lies anywhere below it.
    pub fn is_at_or_below(&self, base: &Dn) -> bool {
        self.rdns.len() >= base.rdns.len()
            && self.rdns[self.rdns.len() - base.rdns.len()..] == base.rdns[..]
    }

    /// Returns `true` if `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        self.rdns.len() > ancestor.rdns.len() && self.is_at_or_below(ancestor)
    }

    /// Returns `true` if `self` lies strictly above `descendant`.
    pub fn is_ancestor_of(&self, descendant: &Dn) -> bool {
        descendant.is_descendant_of(self)
    }

    /// Returns `true` if `self` is exactly one level below `parent`.
    pub fn is_child_of(&self, parent: &Dn) -> bool {
        self.rdns.len() == parent.rdns.len() + 1 && self.is_at_or_below(parent)
    }

    /// The RDNs of `self` that lie below `base`, leaf first.
    ///
    /// Returns `None` if `self` is not at or below `base`.
    pub fn relative_to(&self, base: &Dn) -> Option<&[Rdn]> {
        if self.is_at_or_below(base) {
            Some(&self.rdns[..self.rdns.len() - base.rdns.len()])
        } else {
            None
        }
    }

    /// Canonical string form built from normalized RDNs.
    pub fn to_normalized_string(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::normalized)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rdns.hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rdns.iter().rev().cmp(other.rdns.iter().rev())
    }
}

impl FromStr for Dn {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dn({:?})", self.to_string())
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Dn::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn validate_attr_type(attr_type: &str) -> Result<(), String> {
    let mut chars = attr_type.chars();
    match chars.next() {
        None => Err("attribute type must not be empty".into()),
        Some(c) if c.is_ascii_alphabetic() => {
            if attr_type.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                Ok(())
            } else {
                Err(format!("invalid attribute type {attr_type:?}"))
            }
        }
        Some(c) if c.is_ascii_digit() => {
            let valid = attr_type
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
            if valid {
                Ok(())
            } else {
                Err(format!("invalid numeric OID {attr_type:?}"))
            }
        }
        Some(_) => Err(format!("invalid attribute type {attr_type:?}")),
    }
}

fn normalize_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn escape_value(value: &str, binary: bool) -> String {
    if binary {
        return value.to_string();
    }
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        if c == '\0' {
            out.push_str("\\00");
            continue;
        }
        let leading = i == 0 && (c == '#' || c == ' ');
        let trailing = i == last && c == ' ';
        if leading || trailing || SPECIAL_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

struct DnParser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> DnParser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> TypeError {
        TypeError::invalid_dn(self.src, reason)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<Vec<Rdn>, TypeError> {
        self.skip_spaces();
        let mut rdns = Vec::new();
        if self.peek().is_none() {
            return Ok(rdns);
        }
        loop {
            rdns.push(self.parse_rdn()?);
            match self.bump() {
                None => break,
                Some(',') | Some(';') => {
                    self.skip_spaces();
                    if self.peek().is_none() {
                        return Err(self.error("trailing RDN separator"));
                    }
                }
                Some(c) => return Err(self.error(format!("unexpected character {c:?}"))),
            }
        }
        Ok(rdns)
    }

    fn parse_rdn(&mut self) -> Result<Rdn, TypeError> {
        let mut avas = vec![self.parse_ava()?];
        while self.peek() == Some('+') {
            self.pos += 1;
            avas.push(self.parse_ava()?);
        }
        Ok(Rdn::from_avas(avas))
    }

    fn parse_ava(&mut self) -> Result<Ava, TypeError> {
        self.skip_spaces();
        let start = self.pos;
        loop {
            match self.peek() {
                Some('=') => break,
                Some(',') | Some('+') | Some(';') | None => {
                    return Err(self.error("expected '=' after attribute type"));
                }
                Some(_) => self.pos += 1,
            }
        }
        let attr_type: String = self.chars[start..self.pos].iter().collect();
        let attr_type = attr_type.trim().to_string();
        validate_attr_type(&attr_type).map_err(|reason| self.error(reason))?;
        self.pos += 1;
        self.skip_spaces();

        let ava = match self.peek() {
            Some('#') => self.parse_hex_value(attr_type)?,
            Some('"') => self.parse_quoted_value(attr_type)?,
            _ => self.parse_string_value(attr_type)?,
        };
        self.skip_spaces();
        Ok(ava)
    }

    fn parse_string_value(&mut self, attr_type: String) -> Result<Ava, TypeError> {
        let mut bytes = Vec::new();
        // Unescaped trailing spaces are not part of the value.
        let mut significant = 0;
        while let Some(c) = self.peek() {
            match c {
                ',' | '+' | ';' => break,
                '\\' => {
                    self.pos += 1;
                    self.parse_escape(&mut bytes)?;
                    significant = bytes.len();
                }
                _ => {
                    self.pos += 1;
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    if c != ' ' {
                        significant = bytes.len();
                    }
                }
            }
        }
        bytes.truncate(significant);
        let value = String::from_utf8(bytes).map_err(|_| self.error("value is not valid UTF-8"))?;
        Ok(Ava::build(attr_type, value, false))
    }

    fn parse_quoted_value(&mut self, attr_type: String) -> Result<Ava, TypeError> {
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated quoted value")),
                Some('"') => break,
                Some('\\') => self.parse_escape(&mut bytes)?,
                Some(c) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        let value = String::from_utf8(bytes).map_err(|_| self.error("value is not valid UTF-8"))?;
        Ok(Ava::build(attr_type, value, false))
    }

    fn parse_hex_value(&mut self, attr_type: String) -> Result<Ava, TypeError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let digits = self.pos - start - 1;
        if digits == 0 || digits % 2 != 0 {
            return Err(self.error("BER value must be an even, non-zero number of hex digits"));
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        Ok(Ava::build(attr_type, value, true))
    }

    fn parse_escape(&mut self, out: &mut Vec<u8>) -> Result<(), TypeError> {
        let c = self.bump().ok_or_else(|| self.error("dangling escape at end of input"))?;
        if let Some(hi) = c.to_digit(16) {
            let lo = self
                .peek()
                .and_then(|d| d.to_digit(16))
                .ok_or_else(|| self.error("escape must be a special character or two hex digits"))?;
            self.pos += 1;
            out.push((hi * 16 + lo) as u8);
            return Ok(());
        }
        if SPECIAL_CHARS.contains(&c) || c == '#' || c == ' ' {
            out.push(c as u8);
            Ok(())
        } else {
            Err(self.error(format!("invalid escaped character {c:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_simple_dn() {
        let d = dn("cn=foo,ou=People,dc=example,dc=com");
        assert_eq!(d.size(), 4);
        assert_eq!(d.rdn().unwrap().normalized(), "cn=foo");
        assert_eq!(d.to_string(), "cn=foo,ou=People,dc=example,dc=com");
    }

    #[test]
    fn empty_string_is_root() {
        assert!(dn("").is_root());
        assert!(dn("   ").is_root());
        assert_eq!(Dn::root().to_string(), "");
        assert!(Dn::root().parent().is_none());
    }

    #[test]
    fn spaces_around_separators_are_ignored() {
        assert_eq!(dn("dc=example, dc=com"), dn("dc=example,dc=com"));
        assert_eq!(dn(" cn = foo ; dc=com "), dn("cn=foo,dc=com"));
    }

    #[test]
    fn case_and_whitespace_are_normalized() {
        let a = dn("CN=John   Smith,DC=Example,DC=COM");
        let b = dn("cn=john smith,dc=example,dc=com");
        assert_eq!(a, b);
        assert_eq!(a.to_normalized_string(), "cn=john smith,dc=example,dc=com");
        // Display keeps the user-supplied form.
        assert_eq!(a.to_string(), "CN=John   Smith,DC=Example,DC=COM");
    }

    #[test]
    fn escaped_characters() {
        let d = dn(r"cn=Smith\, John,dc=com");
        assert_eq!(d.size(), 2);
        assert_eq!(d.rdn().unwrap().avas()[0].value(), "Smith, John");
        assert_eq!(d.to_normalized_string(), r"cn=smith\, john,dc=com");
    }

    #[test]
    fn hex_escapes_decode_utf8() {
        let d = dn(r"cn=Caf\C3\A9,dc=com");
        assert_eq!(d.rdn().unwrap().avas()[0].value(), "Café");
    }

    #[test]
    fn escaped_trailing_space_is_kept() {
        let d = dn(r"cn=foo\ ,dc=com");
        assert_eq!(d.rdn().unwrap().avas()[0].value(), "foo ");
        let plain = dn("cn=foo ,dc=com");
        assert_eq!(plain.rdn().unwrap().avas()[0].value(), "foo");
    }

    #[test]
    fn quoted_value() {
        let d = dn(r#"cn="Smith, John",dc=com"#);
        assert_eq!(d.rdn().unwrap().avas()[0].value(), "Smith, John");
    }

    #[test]
    fn hex_ber_value() {
        let d = dn("uid=#04024869,dc=com");
        assert_eq!(d.rdn().unwrap().normalized(), "uid=#04024869");
        assert_ne!(d, dn(r"uid=\#04024869,dc=com"));
    }

    #[test]
    fn multi_valued_rdn_is_order_insensitive() {
        let a = dn("cn=John+sn=Smith,dc=com");
        let b = dn("sn=smith+CN=john,dc=com");
        assert_eq!(a, b);
        assert!(a.rdn().unwrap().is_multi_valued());
        assert_eq!(a.rdn().unwrap().normalized(), "cn=john+sn=smith");
    }

    #[test]
    fn numeric_oid_attribute_type() {
        let d = dn("2.5.4.3=foo,dc=com");
        assert_eq!(d.rdn().unwrap().normalized(), "2.5.4.3=foo");
    }

    #[test]
    fn empty_value_is_allowed() {
        let d = dn("cn=,dc=com");
        assert_eq!(d.rdn().unwrap().avas()[0].value(), "");
    }

    #[test]
    fn malformed_dns_are_rejected() {
        for bad in [
            "cn",
            "=foo",
            "cn=foo,",
            "cn=foo,,dc=com",
            "cn=foo+",
            r"cn=foo\",
            r"cn=\zz",
            r"cn=\4",
            "cn=\"unterminated",
            "c n=foo",
            "1..2=foo",
            "uid=#123",
            "-cn=foo",
        ] {
            let err = Dn::parse(bad).unwrap_err();
            assert!(matches!(err, TypeError::InvalidDn { .. }), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn rdn_parse_requires_single_rdn() {
        assert!(Rdn::parse("cn=foo").is_ok());
        assert!(Rdn::parse("cn=foo,dc=com").is_err());
        assert!(Rdn::parse("").is_err());
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    #[test]
    fn parent_and_child() {
        let people = dn("ou=People,dc=example,dc=com");
        let foo = people.child(Rdn::single("cn", "foo").unwrap());
        assert_eq!(foo, dn("cn=foo,ou=people,dc=example,dc=com"));
        assert_eq!(foo.parent().unwrap(), people);
    }

    #[test]
    fn descendant_relations() {
        let base = dn("dc=example,dc=com");
        let people = dn("ou=People,dc=example,dc=com");
        let foo = dn("cn=foo,ou=People,dc=example,dc=com");

        assert!(people.is_child_of(&base));
        assert!(foo.is_descendant_of(&base));
        assert!(!foo.is_child_of(&base));
        assert!(base.is_ancestor_of(&foo));
        assert!(!base.is_descendant_of(&base));
        assert!(base.is_at_or_below(&base));
        assert!(!dn("dc=other,dc=com").is_at_or_below(&base));
        assert!(foo.is_descendant_of(&Dn::root()));
    }

    #[test]
    fn relative_to_base() {
        let base = dn("dc=example,dc=com");
        let foo = dn("cn=foo,ou=People,dc=example,dc=com");
        let rel = foo.relative_to(&base).unwrap();
        assert_eq!(rel.len(), 2);
        assert_eq!(rel[0].normalized(), "cn=foo");
        assert_eq!(base.relative_to(&base).unwrap().len(), 0);
        assert!(dn("dc=non,dc=existing").relative_to(&base).is_none());
    }

    #[test]
    fn ordering_is_hierarchical() {
        let mut dns = vec![
            dn("cn=foo,ou=People,dc=example,dc=com"),
            dn("cn=barbar,ou=People,dc=example,dc=com"),
            dn("cn=dev0,cn=bar,ou=People,dc=example,dc=com"),
            dn("ou=People,dc=example,dc=com"),
            dn("cn=bar,ou=People,dc=example,dc=com"),
        ];
        dns.sort();
        let names: Vec<String> = dns.iter().map(|d| d.rdn().unwrap().to_string()).collect();
        assert_eq!(names, ["ou=People", "cn=bar", "cn=dev0", "cn=barbar", "cn=foo"]);
    }

    #[test]
    fn serde_uses_string_form() {
        let d = dn("cn=foo,dc=com");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"cn=foo,dc=com\"");
        let back: Dn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert!(serde_json::from_str::<Dn>("\"cn\"").is_err());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn any_rdn() -> impl Strategy<Value = Rdn> {
        ("[a-z][a-z0-9-]{0,6}", "[a-zA-Z0-9 ,+=#\\\\\"<>;]{0,12}")
            .prop_map(|(t, v)| Rdn::single(&t, &v).unwrap())
    }

    fn any_dn() -> impl Strategy<Value = Dn> {
        prop::collection::vec(any_rdn(), 0..5).prop_map(Dn::from_rdns)
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(d in any_dn()) {
            let reparsed = Dn::parse(&d.to_string()).unwrap();
            prop_assert_eq!(&reparsed, &d);
        }

        #[test]
        fn normalized_form_is_a_fixed_point(d in any_dn()) {
            let normalized = d.to_normalized_string();
            let reparsed = Dn::parse(&normalized).unwrap();
            prop_assert_eq!(reparsed.to_normalized_string(), normalized);
        }

        #[test]
        fn child_is_descendant(d in any_dn(), r in any_rdn()) {
            let c = d.child(r);
            prop_assert!(c.is_child_of(&d));
            prop_assert!(d < c);
            prop_assert_eq!(c.parent().unwrap(), d);
        }
    }
}
