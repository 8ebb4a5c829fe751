//! Order-preserving encoding of DNs into tree keys.
//!
//! Keys are relative to a base DN, which itself encodes to the empty key.
//! Each RDN below the base, from the base downwards, appends [`SEPARATOR`]
//! followed by its normalized string with `0x00` and `0x01` escaped:
//!
//! ```text
//! dc=example,dc=com                 (base)   ""
//! ou=People,dc=example,dc=com                00 "ou=people"
//! cn=bar,ou=People,dc=example,dc=com         00 "ou=people" 00 "cn=bar"
//! ```
//!
//! Escaped RDNs never contain the separator, so an ancestor's key followed
//! by the separator is a prefix of exactly its descendants' keys, and
//! unsigned byte order of keys equals hierarchical DN order: a parent sorts
//! before its subtree, and a subtree sorts before the parent's next sibling.

use dirstore_types::{Dn, Rdn, TypeError};

/// Starts every RDN component of a key.
pub const SEPARATOR: u8 = 0x00;

/// Escape byte; `0x00` becomes `01 01`, `0x01` becomes `01 02`.
const ESCAPE: u8 = 0x01;

/// Sorts after every byte that may follow the separator-free key of a DN.
const SUBTREE_END: u8 = 0x01;

/// Encoder and decoder for keys relative to one base DN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnKey {
    base: Dn,
}

impl DnKey {
    pub fn new(base: Dn) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Dn {
        &self.base
    }

    /// Encode `dn`, which must be the base DN or lie below it.
    pub fn encode(&self, dn: &Dn) -> Result<Vec<u8>, TypeError> {
        let relative = dn.relative_to(&self.base).ok_or_else(|| TypeError::InvalidDn {
            dn: dn.to_string(),
            reason: format!("not under base DN {}", self.base),
        })?;

        let mut key = Vec::new();
        for rdn in relative.iter().rev() {
            key.push(SEPARATOR);
            escape_into(rdn.normalized().as_bytes(), &mut key);
        }
        Ok(key)
    }

    /// Prefix shared by the keys of all descendants of `dn`, and by no other
    /// key.
    pub fn encode_child_prefix(&self, dn: &Dn) -> Result<Vec<u8>, TypeError> {
        let mut key = self.encode(dn)?;
        key.push(SEPARATOR);
        Ok(key)
    }

    /// Rebuild the normalized DN a key was encoded from.
    pub fn decode(&self, key: &[u8]) -> Result<Dn, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidDn {
            dn: format!("{key:02x?}"),
            reason: format!("undecodable key: {reason}"),
        };
        if key.is_empty() {
            return Ok(self.base.clone());
        }
        if key[0] != SEPARATOR {
            return Err(invalid("missing leading separator"));
        }

        let mut rdns = Vec::with_capacity(depth(key));
        for component in key[1..].split(|&b| b == SEPARATOR) {
            let raw = unescape(component).ok_or_else(|| invalid("bad escape sequence"))?;
            let text = String::from_utf8(raw).map_err(|_| invalid("RDN is not UTF-8"))?;
            rdns.push(Rdn::parse(&text)?);
        }
        rdns.reverse();
        rdns.extend(self.base.rdns().iter().cloned());
        Ok(Dn::from_rdns(rdns))
    }
}

/// Smallest key greater than `key` and every key of its subtree.
pub fn after_subtree(key: &[u8]) -> Vec<u8> {
    let mut end = Vec::with_capacity(key.len() + 1);
    end.extend_from_slice(key);
    end.push(SUBTREE_END);
    end
}

/// Number of RDNs between the base DN and the DN `key` encodes.
pub fn depth(key: &[u8]) -> usize {
    key.iter().filter(|&&b| b == SEPARATOR).count()
}

/// The key of the ancestor at `depth` levels below the base, or `key`
/// itself if it is not that deep.
pub(crate) fn ancestor_at(key: &[u8], depth: usize) -> &[u8] {
    key.iter()
        .enumerate()
        .filter(|(_, &b)| b == SEPARATOR)
        .nth(depth)
        .map_or(key, |(at, _)| &key[..at])
}

fn escape_into(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            0x00 => out.extend_from_slice(&[ESCAPE, 0x01]),
            0x01 => out.extend_from_slice(&[ESCAPE, 0x02]),
            _ => out.push(b),
        }
    }
}

fn unescape(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b != ESCAPE {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(0x01) => out.push(0x00),
            Some(0x02) => out.push(0x01),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn codec() -> DnKey {
        DnKey::new(dn("dc=example,dc=com"))
    }

    #[test]
    fn base_encodes_to_empty_key() {
        assert!(codec().encode(&dn("DC=Example, DC=Com")).unwrap().is_empty());
        assert_eq!(codec().encode_child_prefix(&dn("dc=example,dc=com")).unwrap(), vec![0]);
    }

    #[test]
    fn encodes_root_to_leaf() {
        let key = codec().encode(&dn("cn=Bar,ou=People,dc=example,dc=com")).unwrap();
        assert_eq!(key, b"\x00ou=people\x00cn=bar".to_vec());
        assert_eq!(depth(&key), 2);
        assert_eq!(ancestor_at(&key, 1), b"\x00ou=people");
        assert_eq!(ancestor_at(&key, 2), &key[..]);
    }

    #[test]
    fn rejects_dn_outside_base() {
        let err = codec().encode(&dn("dc=non,dc=existing")).unwrap_err();
        assert!(matches!(err, TypeError::InvalidDn { reason, .. } if reason.contains("not under base DN")));
        assert!(codec().encode(&Dn::root()).is_err());
    }

    #[test]
    fn escapes_low_bytes() {
        let d = Dn::from_rdns([Rdn::single("cn", "a\u{0}b\u{1}c").unwrap()]);
        let key = DnKey::new(Dn::root()).encode(&d).unwrap();
        assert_eq!(depth(&key), 1);
        assert_eq!(key, b"\x00cn=a\\00b\x01\x02c".to_vec());
        assert_eq!(DnKey::new(Dn::root()).decode(&key).unwrap(), d);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(codec().decode(b"ou=people").is_err());
        assert!(codec().decode(b"\x00ou=people\x01").is_err());
        assert!(codec().decode(b"\x00\xff\xfe").is_err());
        assert!(codec().decode(b"\x00no-equals-sign").is_err());
    }

    #[test]
    fn siblings_sort_by_name_around_subtrees() {
        let c = codec();
        let mut keys: Vec<(Vec<u8>, &str)> = [
            "cn=foofoo,ou=People,dc=example,dc=com",
            "cn=dev0,cn=bar,ou=People,dc=example,dc=com",
            "cn=foo,ou=People,dc=example,dc=com",
            "cn=barbar,ou=People,dc=example,dc=com",
            "cn=bar,ou=People,dc=example,dc=com",
        ]
        .into_iter()
        .map(|s| (c.encode(&dn(s)).unwrap(), s))
        .collect();
        keys.sort();
        let order: Vec<&str> = keys.iter().map(|(_, s)| s.split(',').next().unwrap()).collect();
        assert_eq!(order, ["cn=bar", "cn=dev0", "cn=barbar", "cn=foo", "cn=foofoo"]);
    }

    fn any_rdn() -> impl Strategy<Value = Rdn> {
        ("[a-z]{1,3}", "[a-zA-Z0-9 ,+=#\\x00\\x01]{0,8}")
            .prop_map(|(t, v)| Rdn::single(&t, &v).unwrap())
    }

    fn any_dn() -> impl Strategy<Value = Dn> {
        prop::collection::vec(any_rdn(), 0..5).prop_map(Dn::from_rdns)
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(d in any_dn()) {
            let c = DnKey::new(Dn::root());
            let key = c.encode(&d).unwrap();
            prop_assert_eq!(c.decode(&key).unwrap(), d.clone());
            prop_assert_eq!(depth(&key), d.size());
        }

        #[test]
        fn key_order_matches_dn_order(a in any_dn(), b in any_dn()) {
            let c = DnKey::new(Dn::root());
            let (ka, kb) = (c.encode(&a).unwrap(), c.encode(&b).unwrap());
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        }

        #[test]
        fn child_prefix_selects_exactly_descendants(a in any_dn(), b in any_dn()) {
            let c = DnKey::new(Dn::root());
            let prefix = c.encode_child_prefix(&a).unwrap();
            let kb = c.encode(&b).unwrap();
            prop_assert_eq!(kb.starts_with(&prefix), b.is_descendant_of(&a));
            if b.is_descendant_of(&a) {
                prop_assert!(kb < after_subtree(&c.encode(&a).unwrap()));
            }
        }
    }
}
