//! Configuration flags.
//!
//! A [`FlagRegistry`] holds every named, typed configuration value of a
//! generation run. Flags are registered (and resolved) the first time they
//! are accessed, then frozen by [`FlagRegistry::lock`], which also computes
//! the [`ConfigHash`] that namespaces build outputs.
//!
//! Resolution order, highest priority first:
//! 1. Command-line arguments (`name=value`, or bare `name` for `true`)
//! 2. The persisted flag file written by the previous run
//! 3. Workspace configuration (`[flags]` in `.dagen/config.toml`)
//! 4. The flag's programmatic default

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::short_digest;

/// Name of the file resolved flag values are persisted to, inside the build root.
pub const PERSISTED_FLAGS_FILE: &str = "FLAGS.json";

/// Number of digest bytes kept in a configuration hash.
const CONFIG_HASH_BYTES: usize = 4;

/// Error raised while registering, resolving or locking flags.
#[derive(Debug, Error, Diagnostic)]
pub enum FlagError {
    #[error("multiple flags with name `{name}`")]
    #[diagnostic(
        code(dagen::flags::duplicate),
        help("Every flag name must be unique; rename one of the definitions")
    )]
    DuplicateFlag { name: String },

    #[error("flag `{name}` registered after flags were locked")]
    #[diagnostic(
        code(dagen::flags::locked),
        help("Flags must be accessed before any target is built")
    )]
    Locked { name: String },

    #[error("flag `{name}` accessed, but not registered")]
    #[diagnostic(code(dagen::flags::not_registered))]
    NotRegistered { name: String },

    #[error("flag `{name}` has no value")]
    #[diagnostic(
        code(dagen::flags::missing_value),
        help("Pass `{name}=<value>` on the command line or give the flag a default")
    )]
    MissingValue { name: String },

    #[error("invalid value `{value}` for {expected} flag `{name}`")]
    #[diagnostic(code(dagen::flags::invalid_value))]
    InvalidValue {
        name: String,
        value: String,
        expected: FlagType,
    },

    #[error("flag `{name}` has unallowed value `{value}` (allowed: {})", allowed.join(", "))]
    #[diagnostic(code(dagen::flags::disallowed_value))]
    DisallowedValue {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("flag `{name}` is a {found} flag, not {expected}")]
    #[diagnostic(code(dagen::flags::type_mismatch))]
    TypeMismatch {
        name: String,
        expected: FlagType,
        found: FlagType,
    },

    #[error("failed to access flag file {}: {source}", path.display())]
    #[diagnostic(code(dagen::flags::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed flag file {}: {source}", path.display())]
    #[diagnostic(
        code(dagen::flags::malformed_file),
        help("Delete the file to reset persisted flag values")
    )]
    MalformedFlagFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Declared type of a flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    #[default]
    String,
    Bool,
    Int,
    Float,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::String => "string",
            FlagType::Bool => "bool",
            FlagType::Int => "int",
            FlagType::Float => "float",
        }
    }

    /// Parse a raw string into a value of this type.
    pub fn parse(&self, name: &str, raw: &str) -> Result<FlagValue, FlagError> {
        let invalid = || FlagError::InvalidValue {
            name: name.to_string(),
            value: raw.to_string(),
            expected: *self,
        };
        match self {
            FlagType::String => Ok(FlagValue::String(raw.to_string())),
            FlagType::Bool => match raw {
                "true" => Ok(FlagValue::Bool(true)),
                "false" => Ok(FlagValue::Bool(false)),
                _ => Err(invalid()),
            },
            FlagType::Int => raw.parse().map(FlagValue::Int).map_err(|_| invalid()),
            FlagType::Float => raw.parse().map(FlagValue::Float).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved flag value.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl FlagValue {
    pub fn ty(&self) -> FlagType {
        match self {
            FlagValue::String(_) => FlagType::String,
            FlagValue::Bool(_) => FlagType::Bool,
            FlagValue::Int(_) => FlagType::Int,
            FlagValue::Float(_) => FlagType::Float,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::String(s) => f.write_str(s),
            FlagValue::Bool(b) => write!(f, "{}", b),
            FlagValue::Int(i) => write!(f, "{}", i),
            FlagValue::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> Self {
        FlagValue::String(s.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> Self {
        FlagValue::String(s)
    }
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> Self {
        FlagValue::Bool(b)
    }
}

impl From<i64> for FlagValue {
    fn from(i: i64) -> Self {
        FlagValue::Int(i)
    }
}

impl From<f64> for FlagValue {
    fn from(x: f64) -> Self {
        FlagValue::Float(x)
    }
}

/// Definition of a flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDef {
    pub name: String,
    pub description: String,
    pub ty: FlagType,
    /// Allowed values in string form; empty means any value is allowed.
    pub allowed: Vec<String>,
    pub default: Option<FlagValue>,
}

impl FlagDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>, ty: FlagType) -> Self {
        FlagDef {
            name: name.into(),
            description: description.into(),
            ty,
            allowed: Vec::new(),
            default: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, FlagType::String)
    }

    pub fn bool(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, FlagType::Bool)
    }

    pub fn int(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, FlagType::Int)
    }

    pub fn float(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, FlagType::Float)
    }

    /// Restrict the flag to the given values.
    pub fn allow<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    /// Set the programmatic default.
    pub fn default_value(mut self, value: impl Into<FlagValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Allow-list used for validation and reporting.
    fn effective_allowed(&self) -> Vec<String> {
        if self.ty == FlagType::Bool {
            vec!["true".to_string(), "false".to_string()]
        } else {
            self.allowed.clone()
        }
    }
}

/// Untyped handle to a registered flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlagHandle {
    name: String,
    ty: FlagType,
}

impl FlagHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> FlagType {
        self.ty
    }
}

/// Typed handle to a registered flag.
#[derive(Debug, Clone)]
pub struct Flag<T> {
    handle: FlagHandle,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Flag<T> {
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> &FlagHandle {
        &self.handle
    }
}

/// Rust types a flag value can be read as.
pub trait FlagKind: Sized {
    const TYPE: FlagType;

    fn from_value(value: &FlagValue) -> Option<Self>;
}

impl FlagKind for String {
    const TYPE: FlagType = FlagType::String;

    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FlagKind for bool {
    const TYPE: FlagType = FlagType::Bool;

    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FlagKind for i64 {
    const TYPE: FlagType = FlagType::Int;

    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FlagKind for f64 {
    const TYPE: FlagType = FlagType::Float;

    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Float(x) => Some(*x),
            _ => None,
        }
    }
}

/// Hash identifying a complete flag configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigHash(String);

impl ConfigHash {
    pub fn new(hash: impl Into<String>) -> Self {
        ConfigHash(hash.into())
    }

    /// Hash `name=value` pairs independent of their order.
    pub fn of<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let mut entries: Vec<String> = pairs
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        entries.sort();
        ConfigHash(short_digest(entries.join("#").as_bytes(), CONFIG_HASH_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reported information about a resolved flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagInfo {
    pub description: String,
    #[serde(rename = "type")]
    pub ty: FlagType,
    pub allowed_values: Vec<String>,
    pub value: String,
}

/// Result of locking the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedFlags {
    pub hash: ConfigHash,
    pub flags: BTreeMap<String, FlagInfo>,
}

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOrigin {
    Cmdline,
    Persisted,
    Workspace,
    Default,
}

/// Raw override values, by priority tier.
#[derive(Debug, Clone, Default)]
pub struct FlagSources {
    pub cmdline: BTreeMap<String, String>,
    pub persisted: BTreeMap<String, String>,
    pub workspace: BTreeMap<String, String>,
}

impl FlagSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name=value` arguments; a bare `name` means `true`.
    pub fn parse_cmdline<S: AsRef<str>>(args: &[S]) -> BTreeMap<String, String> {
        args.iter()
            .map(|arg| match arg.as_ref().split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (arg.as_ref().to_string(), "true".to_string()),
            })
            .collect()
    }

    /// Load a persisted flag file. A missing file yields no overrides.
    pub fn load_persisted(path: &Path) -> Result<BTreeMap<String, String>, FlagError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(FlagError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data).map_err(|source| FlagError::MalformedFlagFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_cmdline(mut self, cmdline: BTreeMap<String, String>) -> Self {
        self.cmdline = cmdline;
        self
    }

    pub fn with_persisted(mut self, persisted: BTreeMap<String, String>) -> Self {
        self.persisted = persisted;
        self
    }

    pub fn with_workspace(mut self, workspace: BTreeMap<String, String>) -> Self {
        self.workspace = workspace;
        self
    }

    fn lookup(&self, name: &str) -> Option<(&str, FlagOrigin)> {
        if let Some(v) = self.cmdline.get(name) {
            return Some((v, FlagOrigin::Cmdline));
        }
        if let Some(v) = self.persisted.get(name) {
            return Some((v, FlagOrigin::Persisted));
        }
        self.workspace
            .get(name)
            .map(|v| (v.as_str(), FlagOrigin::Workspace))
    }
}

#[derive(Debug)]
struct Entry {
    def: FlagDef,
    value: FlagValue,
    origin: FlagOrigin,
}

/// Registry of all flags of a generation run.
#[derive(Debug, Default)]
pub struct FlagRegistry {
    sources: FlagSources,
    entries: BTreeMap<String, Entry>,
    locked: Option<LockedFlags>,
}

impl FlagRegistry {
    pub fn new(sources: FlagSources) -> Self {
        FlagRegistry {
            sources,
            entries: BTreeMap::new(),
            locked: None,
        }
    }

    /// Register a flag and resolve its value.
    ///
    /// Registering an identical definition again returns the same handle.
    pub fn register(&mut self, def: FlagDef) -> Result<FlagHandle, FlagError> {
        if let Some(entry) = self.entries.get(&def.name) {
            if entry.def == def {
                return Ok(FlagHandle {
                    name: def.name,
                    ty: entry.def.ty,
                });
            }
            return Err(FlagError::DuplicateFlag { name: def.name });
        }

        if self.locked.is_some() {
            return Err(FlagError::Locked { name: def.name });
        }

        let (value, origin) = match self.sources.lookup(&def.name) {
            Some((raw, origin)) => (def.ty.parse(&def.name, raw)?, origin),
            None => match &def.default {
                Some(value) if value.ty() == def.ty => (value.clone(), FlagOrigin::Default),
                Some(value) => {
                    return Err(FlagError::InvalidValue {
                        name: def.name.clone(),
                        value: value.to_string(),
                        expected: def.ty,
                    })
                }
                None => return Err(FlagError::MissingValue { name: def.name }),
            },
        };

        tracing::debug!("flag {} = {} ({:?})", def.name, value, origin);

        let handle = FlagHandle {
            name: def.name.clone(),
            ty: def.ty,
        };
        self.entries.insert(
            def.name.clone(),
            Entry { def, value, origin },
        );
        Ok(handle)
    }

    /// Register a flag and get a typed handle to it.
    pub fn flag<T: FlagKind>(&mut self, def: FlagDef) -> Result<Flag<T>, FlagError> {
        if def.ty != T::TYPE {
            return Err(FlagError::TypeMismatch {
                name: def.name,
                expected: T::TYPE,
                found: def.ty,
            });
        }
        Ok(Flag {
            handle: self.register(def)?,
            _kind: PhantomData,
        })
    }

    /// Value of a registered flag.
    pub fn value(&self, handle: &FlagHandle) -> Result<&FlagValue, FlagError> {
        self.lookup(&handle.name)
    }

    /// Typed value of a registered flag.
    pub fn get<T: FlagKind>(&self, flag: &Flag<T>) -> Result<T, FlagError> {
        let value = self.value(&flag.handle)?;
        T::from_value(value).ok_or_else(|| FlagError::TypeMismatch {
            name: flag.handle.name.clone(),
            expected: T::TYPE,
            found: value.ty(),
        })
    }

    /// Value of a flag by name.
    pub fn lookup(&self, name: &str) -> Result<&FlagValue, FlagError> {
        self.entries
            .get(name)
            .map(|e| &e.value)
            .ok_or_else(|| FlagError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// Origin of a flag's resolved value.
    pub fn origin(&self, name: &str) -> Option<FlagOrigin> {
        self.entries.get(name).map(|e| e.origin)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// The configuration hash, once locked.
    pub fn hash(&self) -> Option<&ConfigHash> {
        self.locked.as_ref().map(|l| &l.hash)
    }

    /// Freeze the registry, validate allow-lists and compute the hash.
    ///
    /// When `persist_to` is given, the resolved values are written there as a
    /// flat JSON object. Locking again returns the first result.
    pub fn lock(&mut self, persist_to: Option<&Path>) -> Result<LockedFlags, FlagError> {
        if let Some(locked) = &self.locked {
            return Ok(locked.clone());
        }

        let mut flags = BTreeMap::new();
        for (name, entry) in &self.entries {
            let value = entry.value.to_string();
            let allowed = entry.def.effective_allowed();
            if !allowed.is_empty() && !allowed.contains(&value) {
                return Err(FlagError::DisallowedValue {
                    name: name.clone(),
                    value,
                    allowed,
                });
            }
            flags.insert(
                name.clone(),
                FlagInfo {
                    description: entry.def.description.clone(),
                    ty: entry.def.ty,
                    allowed_values: allowed,
                    value,
                },
            );
        }

        for name in self.sources.cmdline.keys() {
            if !self.entries.contains_key(name) {
                tracing::warn!("ignoring unknown flag `{}`", name);
            }
        }

        let hash = ConfigHash::of(flags.iter().map(|(n, i)| (n.as_str(), i.value.clone())));

        if let Some(path) = persist_to {
            persist(path, &flags)?;
        }

        tracing::debug!("locked {} flags, configuration hash {}", flags.len(), hash);

        let locked = LockedFlags { hash, flags };
        self.locked = Some(locked.clone());
        Ok(locked)
    }
}

fn persist(path: &Path, flags: &BTreeMap<String, FlagInfo>) -> Result<(), FlagError> {
    let values: BTreeMap<&str, &str> = flags
        .iter()
        .map(|(name, info)| (name.as_str(), info.value.as_str()))
        .collect();
    let data = serde_json::to_string_pretty(&values).map_err(|source| {
        FlagError::MalformedFlagFile {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let io_err = |source| FlagError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, data).map_err(io_err)
}
