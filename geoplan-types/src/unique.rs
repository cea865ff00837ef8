//! Map deserialization that rejects repeated keys instead of keeping the last one.
//!
//! Keys are read as strings and parsed, so integer-keyed maps also work when the
//! map is buffered inside an internally tagged enum.

use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

pub(crate) fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: FromStr + Ord,
    K::Err: fmt::Display,
    V: Deserialize<'de>,
{
    struct UniqueMapVisitor<K, V>(PhantomData<(K, V)>);

    impl<'de, K, V> Visitor<'de> for UniqueMapVisitor<K, V>
    where
        K: FromStr + Ord,
        K::Err: fmt::Display,
        V: Deserialize<'de>,
    {
        type Value = BTreeMap<K, V>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map with unique keys")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = BTreeMap::new();
            while let Some((raw, value)) = access.next_entry::<String, V>()? {
                let key = raw
                    .parse::<K>()
                    .map_err(|e| de::Error::custom(format!("invalid key `{}`: {}", raw, e)))?;
                if map.insert(key, value).is_some() {
                    return Err(de::Error::custom(format!("duplicate key `{}`", raw)));
                }
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueMapVisitor(PhantomData))
}
