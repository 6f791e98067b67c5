// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metadata document accompanying a trace.
//!
//! ```yaml
//! version: v1.0
//! steps:
//!   s1:
//!     displayName: count words
//!     command: wc
//!     arguments:
//!       - value: -w
//!       - valueFrom: p1
//!     outputs:
//!       p2: { dataName: d2 }
//! locations:
//!   l1: { hostname: 127.0.0.1, port: 8080 }
//! dependencies:
//!   d1: { type: file, value: input.txt }
//!   d2: { type: stdout }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::DataType;

pub const SUPPORTED_VERSIONS: &[&str] = &["v1.0"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub steps: BTreeMap<String, StepConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub locations: BTreeMap<String, LocationConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, DependencyConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "scalar::port"
    )]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outdir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "scalar::option"
    )]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ArgumentConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputConfig>,
}

/// One positional argument: a literal or a reference to an input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentConfig {
    Value {
        #[serde(deserialize_with = "scalar::required")]
        value: String,
    },
    ValueFrom {
        #[serde(rename = "valueFrom")]
        value_from: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub data_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            version: SUPPORTED_VERSIONS[0].to_string(),
            ..Default::default()
        }
    }

    /// Parse a metadata document, rejecting unsupported versions.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(source)?;
        let found = match raw.get("version") {
            Some(serde_yaml::Value::String(v)) => v.clone(),
            Some(other) => format!("{other:?}"),
            None => "(missing)".to_string(),
        };
        if !SUPPORTED_VERSIONS.contains(&found.as_str()) {
            return Err(ConfigError::UnsupportedVersion {
                found,
                supported: SUPPORTED_VERSIONS,
            });
        }
        Ok(serde_yaml::from_value(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Metadata steps declaring an output port named `port`, with the data
    /// they write to it.
    pub fn port_producers<'a>(
        &'a self,
        port: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a OutputConfig)> + 'a {
        self.steps.iter().filter_map(move |(name, step)| {
            step.outputs.get(port).map(|output| (name.as_str(), output))
        })
    }
}

/// YAML scalars kept in their textual form.
mod scalar {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_yaml::Value;

    fn text<E: Error>(value: Value) -> Result<Option<String>, E> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(E::custom(format!("expected a scalar, found {other:?}"))),
        }
    }

    pub fn option<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        text(Value::deserialize(deserializer)?)
    }

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        text(Value::deserialize(deserializer)?)?
            .ok_or_else(|| D::Error::custom("expected a scalar, found null"))
    }

    /// A TCP port written as a number or as quoted text.
    pub fn port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
        match text(Value::deserialize(deserializer)?)? {
            Some(port) => port
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid port {port:?}"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
version: v1.0
steps:
  s1:
    displayName: count
    command: wc
    arguments:
      - value: -l
      - value: 3
      - valueFrom: p1
    outputs:
      p2:
        dataName: d2
        glob: "*.out"
locations:
  l1:
    hostname: 127.0.0.1
    port: 8080
    connectionType: ssh
    workdir: /tmp/l1
dependencies:
  d1:
    type: file
    value: input.txt
  d2:
    type: stdout
  d3:
    type: string
    value: 42
"#;

    #[test]
    fn test_parse_document() {
        let metadata = Metadata::from_yaml(DOCUMENT).unwrap();
        let step = &metadata.steps["s1"];
        assert_eq!(step.command.as_deref(), Some("wc"));
        assert_eq!(
            step.arguments,
            vec![
                ArgumentConfig::Value { value: "-l".into() },
                ArgumentConfig::Value { value: "3".into() },
                ArgumentConfig::ValueFrom {
                    value_from: "p1".into()
                },
            ]
        );
        assert_eq!(step.outputs["p2"].glob.as_deref(), Some("*.out"));

        let location = &metadata.locations["l1"];
        assert_eq!(location.port, Some(8080));
        assert_eq!(location.connection_type.as_deref(), Some("ssh"));
        assert_eq!(location.outdir, None);

        assert_eq!(metadata.dependencies["d1"].data_type, DataType::File);
        assert_eq!(metadata.dependencies["d2"].value, None);
        assert_eq!(metadata.dependencies["d3"].value.as_deref(), Some("42"));
    }

    #[test]
    fn test_port_accepts_quoted_text() {
        let metadata = Metadata::from_yaml(
            "version: v1.0\nlocations:\n  l1: { hostname: h1, port: \"8080\" }\n  l2: { port: ~ }\n",
        )
        .unwrap();
        assert_eq!(metadata.locations["l1"].port, Some(8080));
        assert_eq!(metadata.locations["l2"].port, None);

        for invalid in ["\"http\"", "70000", "true"] {
            let document = format!("version: v1.0\nlocations:\n  l1: {{ port: {invalid} }}\n");
            let err = Metadata::from_yaml(&document).unwrap_err();
            assert!(matches!(err, ConfigError::Yaml(_)), "{invalid}: {err}");
        }
    }

    #[test]
    fn test_unsupported_version() {
        let err = Metadata::from_yaml("version: v2.0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedVersion { ref found, .. } if found == "v2.0"
        ));
    }

    #[test]
    fn test_missing_version() {
        let err = Metadata::from_yaml("steps: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_written_document_reads_back() {
        let metadata = Metadata::from_yaml(DOCUMENT).unwrap();
        let text = metadata.to_yaml().unwrap();
        assert!(text.starts_with("version: v1.0\nsteps:"));
        assert!(!text.contains("outdir"));
        assert_eq!(Metadata::from_yaml(&text).unwrap(), metadata);
    }

    #[test]
    fn test_port_producers() {
        let metadata = Metadata::from_yaml(DOCUMENT).unwrap();
        let producers: Vec<_> = metadata.port_producers("p2").collect();
        assert_eq!(producers.len(), 1);
        assert_eq!(producers[0].0, "s1");
        assert_eq!(producers[0].1.data_name, "d2");
        assert_eq!(metadata.port_producers("p1").count(), 0);
    }
}
