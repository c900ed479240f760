//! Registrar descriptor types
//!
//! Mirrors the JSON shape `qmltyperegistrar` reads (`types<M>-<m>.json`): a
//! list of per-class modules, each carrying the class' meta-object layout and
//! the source file it was registered from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Meta-object revision emitted in every descriptor
pub const OUTPUT_REVISION: u32 = 68;

/// Errors that can occur reading or writing descriptor files
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// IO error
    #[error("IO error on {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("Invalid descriptor file {}: {source}", path.display())]
    JsonError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    #[serde(default = "public_access")]
    pub access: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentDescriptor>,
    pub return_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumDescriptor {
    pub is_class: bool,
    pub is_flag: bool,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperClass {
    #[serde(default = "public_access")]
    pub access: String,
    pub name: String,
}

/// Structural description of one registered class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDescriptor {
    pub class_name: String,
    pub qualified_class_name: String,
    pub object: bool,
    #[serde(default)]
    pub super_classes: Vec<SuperClass>,
    #[serde(default)]
    pub class_infos: Vec<ClassInfo>,
    #[serde(default)]
    pub enums: Vec<EnumDescriptor>,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub signals: Vec<MethodDescriptor>,
    #[serde(default)]
    pub slots: Vec<MethodDescriptor>,
}

/// One entry of a `types<M>-<m>.json` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub classes: Vec<ClassDescriptor>,
    #[serde(rename = "outputRevision", default = "output_revision")]
    pub output_revision: u32,
    #[serde(rename = "QML_IMPORT_MAJOR_VERSION")]
    pub major_version: u32,
    #[serde(rename = "QML_IMPORT_MINOR_VERSION")]
    pub minor_version: u32,
    #[serde(rename = "QT_MODULES", default)]
    pub qt_modules: Vec<String>,
    #[serde(rename = "PY_MODULES", default)]
    pub py_modules: Vec<String>,
    #[serde(rename = "inputFile")]
    pub input_file: String,
}

impl ModuleDescriptor {
    /// Name of the first class, used as the sort key within a types file
    pub fn sort_key(&self) -> &str {
        self.classes
            .first()
            .map(|c| c.class_name.as_str())
            .unwrap_or("")
    }

    /// Input file resolved against `base` when it is relative
    pub fn resolved_input(&self, base: &Path) -> PathBuf {
        let input = base.join(&self.input_file);
        input.canonicalize().unwrap_or(input)
    }
}

fn public_access() -> String {
    "public".to_string()
}

fn output_revision() -> u32 {
    OUTPUT_REVISION
}

/// Identifies one QML module version: `uri major.minor`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QmlModuleKey {
    pub uri: String,
    pub major: u32,
    pub minor: u32,
}

impl QmlModuleKey {
    pub fn new(uri: impl Into<String>, major: u32, minor: u32) -> Self {
        Self {
            uri: uri.into(),
            major,
            minor,
        }
    }

    /// Directory holding this module's files inside `out_dir`
    pub fn dir_in(&self, out_dir: &Path) -> PathBuf {
        self.uri.split('.').fold(out_dir.to_path_buf(), |dir, part| dir.join(part))
    }

    pub fn types_file_name(&self) -> String {
        format!("types{}-{}.json", self.major, self.minor)
    }

    pub fn qmltypes_file_name(&self) -> String {
        format!("types{}-{}.qmltypes", self.major, self.minor)
    }

    pub fn registrations_file_name(&self) -> String {
        format!("qmltyperegistrations{}-{}.cpp", self.major, self.minor)
    }

    /// Recover the key from an existing `<out_dir>/<uri path>/types<M>-<m>.json`
    pub fn from_types_path(out_dir: &Path, path: &Path) -> Option<Self> {
        let version = path
            .file_name()?
            .to_str()?
            .strip_prefix("types")?
            .strip_suffix(".json")?;
        let (major, minor) = version.split_once('-')?;
        let major = major.parse().ok()?;
        let minor = minor.parse().ok()?;

        let relative = path.parent()?.strip_prefix(out_dir).ok()?;
        let parts = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        if parts.is_empty() {
            return None;
        }

        Some(Self::new(parts.join("."), major, minor))
    }
}

impl fmt::Display for QmlModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.uri, self.major, self.minor)
    }
}

/// A class registered under a QML module during import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(flatten)]
    pub key: QmlModuleKey,
    pub module: ModuleDescriptor,
}

/// Read a `types<M>-<m>.json` file
pub fn read_types_file(path: &Path) -> Result<Vec<ModuleDescriptor>, DescriptorError> {
    let contents = fs::read(path).map_err(|source| DescriptorError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&contents).map_err(|source| DescriptorError::JsonError {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a `types<M>-<m>.json` file, indented by four spaces
pub fn write_types_file(path: &Path, data: &[ModuleDescriptor]) -> Result<(), DescriptorError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    data.serialize(&mut ser)
        .map_err(|source| DescriptorError::JsonError {
            path: path.to_path_buf(),
            source,
        })?;

    fs::write(path, buf).map_err(|source| DescriptorError::IoError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(class_name: &str, input_file: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            classes: vec![ClassDescriptor {
                class_name: class_name.to_string(),
                qualified_class_name: class_name.to_string(),
                object: true,
                super_classes: vec![SuperClass {
                    access: public_access(),
                    name: "QObject".to_string(),
                }],
                class_infos: vec![ClassInfo {
                    name: "QML.Element".to_string(),
                    value: "auto".to_string(),
                }],
                enums: vec![],
                properties: vec![PropertyDescriptor {
                    name: "norm".to_string(),
                    type_name: "double".to_string(),
                    index: 0,
                    notify: None,
                    read: Some("getNorm".to_string()),
                    write: None,
                }],
                signals: vec![],
                slots: vec![],
            }],
            output_revision: OUTPUT_REVISION,
            major_version: 1,
            minor_version: 0,
            qt_modules: vec!["QtCore".to_string()],
            py_modules: vec![],
            input_file: input_file.to_string(),
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(sample("Point", "in/clses.py")).unwrap();

        assert_eq!(json["outputRevision"], 68);
        assert_eq!(json["QML_IMPORT_MAJOR_VERSION"], 1);
        assert_eq!(json["inputFile"], "in/clses.py");
        let class = &json["classes"][0];
        assert_eq!(class["className"], "Point");
        assert_eq!(class["superClasses"][0]["access"], "public");
        assert_eq!(class["properties"][0]["type"], "double");
        assert_eq!(class["properties"][0]["read"], "getNorm");
        assert!(class["properties"][0].get("notify").is_none());
    }

    #[test]
    fn test_types_file_is_four_space_indented() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("types1-0.json");
        let data = vec![sample("Point", "in/clses.py")];

        write_types_file(&path, &data).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n    {\n        \"classes\""));
        assert_eq!(read_types_file(&path).unwrap(), data);
    }

    #[test]
    fn test_read_invalid_types_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("types1-0.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(
            read_types_file(&path),
            Err(DescriptorError::JsonError { .. })
        ));
    }

    #[test]
    fn test_key_paths() {
        let key = QmlModuleKey::new("target.sub", 1, 2);
        let out = Path::new("/out");

        assert_eq!(key.to_string(), "target.sub 1.2");
        assert_eq!(key.dir_in(out), PathBuf::from("/out/target/sub"));
        assert_eq!(key.types_file_name(), "types1-2.json");
        assert_eq!(key.qmltypes_file_name(), "types1-2.qmltypes");
        assert_eq!(key.registrations_file_name(), "qmltyperegistrations1-2.cpp");
        assert_eq!(
            QmlModuleKey::from_types_path(out, &out.join("target/sub/types1-2.json")),
            Some(key)
        );
    }

    #[test]
    fn test_key_from_unrelated_paths() {
        let out = Path::new("/out");
        assert_eq!(QmlModuleKey::from_types_path(out, &out.join("types1-0.json")), None);
        assert_eq!(QmlModuleKey::from_types_path(out, &out.join("a/types1.json")), None);
        assert_eq!(QmlModuleKey::from_types_path(out, &out.join("a/other1-0.json")), None);
    }

    #[test]
    fn test_registration_flattens_key() {
        let json = r#"{
            "uri": "target", "major": 1, "minor": 0,
            "module": {
                "classes": [], "QML_IMPORT_MAJOR_VERSION": 1,
                "QML_IMPORT_MINOR_VERSION": 0, "inputFile": "a.py"
            }
        }"#;
        let reg: Registration = serde_json::from_str(json).unwrap();
        assert_eq!(reg.key, QmlModuleKey::new("target", 1, 0));
        assert_eq!(reg.module.output_revision, OUTPUT_REVISION);
        assert_eq!(reg.module.sort_key(), "");
    }
}
