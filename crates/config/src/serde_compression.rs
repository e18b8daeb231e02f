//! Compression lists as names: `["xz", "gzip"]`, or `"xz,gzip"` when the
//! value comes from a single environment variable.

use aptblob_compress::Compression;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Names {
    One(String),
    Many(Vec<String>),
}

pub fn serialize<S: Serializer>(compressions: &[Compression], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(compressions.iter().map(Compression::as_str))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Compression>, D::Error> {
    let names = match Names::deserialize(deserializer)? {
        Names::One(list) => list.split(',').map(|name| name.trim().to_string()).filter(|name| !name.is_empty()).collect(),
        Names::Many(names) => names,
    };
    names
        .iter()
        .map(|name| name.parse::<Compression>().map_err(|err| D::Error::custom(&*err)))
        .collect()
}
