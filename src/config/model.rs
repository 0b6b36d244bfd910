// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use serde::Deserialize;

use crate::types::{DatasetType, IndicatorType, IsolationMode, ModuleId, ParamType};

/// Top-level project configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// project_id = "demo"
/// interpreter = "Rscript"
///
/// [dataset.hmis]
///
/// [module.m1]
/// script = "df <- read.csv({{dataset:hmis}})"
/// data_sources = [{ source_type = "dataset", dataset_type = "hmis" }]
///
/// [[module.m1.results_objects]]
/// id = "out"
/// columns = ["id", "value"]
/// ```
///
/// This is the raw, unvalidated form. Use [`ProjectConfig::try_from`] (or the
/// loader) to obtain a validated [`ProjectConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawProjectConfig {
    #[serde(default)]
    pub config: ConfigSection,

    /// Datasets from `[dataset.<type>]`.
    #[serde(default)]
    pub dataset: BTreeMap<DatasetType, DatasetConfig>,

    /// Modules from `[module.<id>]`.
    #[serde(default)]
    pub module: BTreeMap<ModuleId, ModuleConfig>,

    /// Passive presentation artifacts from `[artifact.<id>]`.
    #[serde(default)]
    pub artifact: BTreeMap<String, ArtifactConfig>,
}

/// Validated project configuration.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub config: ConfigSection,
    pub dataset: BTreeMap<DatasetType, DatasetConfig>,
    pub module: BTreeMap<ModuleId, ModuleConfig>,
    pub artifact: BTreeMap<String, ArtifactConfig>,
    /// Directory the config was loaded from; asset globs and a relative
    /// `sandbox_root` are resolved against it.
    pub root_dir: PathBuf,
}

impl ProjectConfig {
    /// Construct without validation. Only `TryFrom<RawProjectConfig>` should
    /// call this.
    pub(crate) fn new_unchecked(raw: RawProjectConfig) -> Self {
        Self {
            config: raw.config,
            dataset: raw.dataset,
            module: raw.module,
            artifact: raw.artifact,
            root_dir: PathBuf::from("."),
        }
    }

    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    /// Absolute-or-relative directory holding everything for this project:
    /// `<sandbox_root>/<project_id>`.
    pub fn project_dir(&self) -> PathBuf {
        let root = if self.config.sandbox_root.is_absolute() {
            self.config.sandbox_root.clone()
        } else {
            self.root_dir.join(&self.config.sandbox_root)
        };
        root.join(&self.config.project_id)
    }

    /// Directory holding materialised dataset extracts.
    pub fn datasets_dir(&self) -> PathBuf {
        self.project_dir().join(DATASETS_DIR)
    }

    /// Sandbox directory of a single module.
    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.project_dir().join(MODULES_DIR).join(module)
    }

    /// Directory holding per-run log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.project_dir().join(LOGS_DIR)
    }

    /// Revision of a module as it runs in this project.
    ///
    /// Folds the rendered script into the module's own revision, so project
    /// settings that reach the script (runtime parameters, the missing-value
    /// sentinel, upstream file names) count as a definition change too. A
    /// module that cannot be rendered falls back to its own revision.
    pub fn module_revision(&self, module_id: &str) -> Option<String> {
        let module = self.module.get(module_id)?;
        let own = module.revision();
        match crate::script::render_for(self, module_id) {
            Ok(script) => {
                let mut hasher = Hasher::new();
                hasher.update(own.as_bytes());
                hasher.update(&[0x1e]);
                hasher.update(script.as_bytes());
                Some(hasher.finalize().to_hex().to_string())
            }
            Err(_) => Some(own),
        }
    }

    pub fn resolve_from_root(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }
}

pub const DATASETS_DIR: &str = "datasets";
pub const MODULES_DIR: &str = "modules";
pub const LOGS_DIR: &str = "logs";

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    #[serde(default = "default_project_id")]
    pub project_id: String,

    /// Root under which sandboxes, logs and dataset extracts live.
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,

    /// Interpreter executable, invoked with the script file name as its
    /// sole argument.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// File name of the generated script inside the sandbox.
    #[serde(default = "default_script_name")]
    pub script_name: String,

    #[serde(default)]
    pub isolation: IsolationMode,

    /// Container CLI used when `isolation = "container"`.
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,

    /// Image used when `isolation = "container"`.
    #[serde(default)]
    pub container_image: Option<String>,

    /// Grace period after the interpreter exits, letting slow file writes land.
    #[serde(default = "default_output_grace_ms")]
    pub output_grace_ms: u64,

    /// Raw-field value treated as missing by formula-driven modules.
    #[serde(default)]
    pub missing_sentinel: Option<f64>,

    /// Runtime parameters, substituted for `{{runtime:KEY}}`.
    #[serde(default)]
    pub runtime: BTreeMap<String, String>,
}

fn default_project_id() -> String {
    "default".to_string()
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from(".staleflow")
}

fn default_interpreter() -> String {
    "Rscript".to_string()
}

fn default_script_name() -> String {
    "script.R".to_string()
}

fn default_container_runtime() -> String {
    "docker".to_string()
}

fn default_output_grace_ms() -> u64 {
    1000
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            sandbox_root: default_sandbox_root(),
            interpreter: default_interpreter(),
            script_name: default_script_name(),
            isolation: IsolationMode::default(),
            container_runtime: default_container_runtime(),
            container_image: None,
            output_grace_ms: default_output_grace_ms(),
            missing_sentinel: None,
            runtime: BTreeMap::new(),
        }
    }
}

/// `[dataset.<type>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub description: Option<String>,
}

/// A declared input of a module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum DataSource {
    Dataset {
        dataset_type: DatasetType,
    },
    ResultsObject {
        module_id: ModuleId,
        results_object_id: String,
    },
}

/// `[[module.<id>.results_objects]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsObjectConfig {
    pub id: String,

    /// Possible columns; the produced file's header picks the subset that is
    /// materialised.
    pub columns: Vec<String>,

    /// Columns loaded with the file but dropped from the destination table
    /// afterwards.
    #[serde(default)]
    pub derived_columns: Vec<String>,

    /// Output file name in the sandbox; defaults to `<id>.csv`.
    #[serde(default)]
    pub file: Option<String>,
}

impl ResultsObjectConfig {
    pub fn file_name(&self) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| format!("{}.csv", self.id))
    }
}

/// `[module.<id>.parameters.<NAME>]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterConfig {
    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// `[module.<id>]` section.
///
/// Exactly one of `script` (template-driven) or `formula` (formula-driven)
/// must be present.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// Ordered list of declared inputs.
    #[serde(default)]
    pub data_sources: Vec<DataSource>,

    #[serde(default)]
    pub results_objects: Vec<ResultsObjectConfig>,

    /// Script template with `{{dataset:..}}`, `{{results:..}}`,
    /// `{{param:..}}` and `{{runtime:..}}` placeholders.
    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub formula: Option<FormulaConfig>,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterConfig>,

    /// Values chosen for `parameters`; missing entries fall back to defaults.
    #[serde(default)]
    pub selections: BTreeMap<String, String>,

    /// Glob patterns (relative to the config directory) copied into the sandbox.
    #[serde(default)]
    pub assets: Vec<String>,
}

impl ModuleConfig {
    pub fn results_object(&self, id: &str) -> Option<&ResultsObjectConfig> {
        self.results_objects.iter().find(|ro| ro.id == id)
    }

    /// Opaque version tag of this definition.
    ///
    /// Any change to sources, outputs, script, formula, parameters,
    /// selections or assets yields a different revision.
    pub fn revision(&self) -> String {
        let mut hasher = Hasher::new();
        let mut field = |tag: &str, value: &str| {
            hasher.update(tag.as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(value.as_bytes());
            hasher.update(&[0x1e]);
        };

        for source in &self.data_sources {
            match source {
                DataSource::Dataset { dataset_type } => field("ds", dataset_type),
                DataSource::ResultsObject {
                    module_id,
                    results_object_id,
                } => field("ro", &format!("{module_id}/{results_object_id}")),
            }
        }
        for ro in &self.results_objects {
            field("out", &ro.id);
            field("cols", &ro.columns.join(","));
            field("derived", &ro.derived_columns.join(","));
            field("file", &ro.file_name());
        }
        if let Some(script) = &self.script {
            field("script", script);
        }
        if let Some(formula) = &self.formula {
            field("keys", &formula.key_columns.join(","));
            field("raw", &formula.raw_fields.join(","));
            field("output", &formula.output);
            for ind in &formula.indicators {
                field("ind", &ind.var_name);
                field("cat", &ind.category);
                field("type", &format!("{:?}", ind.indicator_type));
                field("code", &ind.r_code);
                field("filter", ind.r_filter_code.as_deref().unwrap_or(""));
            }
        }
        for (name, param) in &self.parameters {
            field("param", name);
            field("ptype", &format!("{:?}", param.param_type));
            field("pdefault", param.default.as_deref().unwrap_or(""));
        }
        for (name, value) in &self.selections {
            field("sel", &format!("{name}={value}"));
        }
        for asset in &self.assets {
            field("asset", asset);
        }

        hasher.finalize().to_hex().to_string()
    }
}

/// `[module.<id>.formula]` section.
///
/// The module's first data source is the input table the indicators are
/// computed over.
#[derive(Debug, Clone, Deserialize)]
pub struct FormulaConfig {
    /// Columns carried through to the output alongside the indicators.
    #[serde(default)]
    pub key_columns: Vec<String>,

    /// Raw input fields indicator formulas may reference.
    #[serde(default)]
    pub raw_fields: Vec<String>,

    /// Results object the indicator table is written to.
    pub output: String,

    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
}

/// `[[module.<id>.formula.indicators]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndicatorConfig {
    pub var_name: String,

    #[serde(default)]
    pub category: String,

    #[serde(rename = "type")]
    pub indicator_type: IndicatorType,

    pub r_code: String,

    #[serde(default)]
    pub r_filter_code: Option<String>,
}

/// Consumer reference of a presentation artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactSource {
    pub module_id: ModuleId,
    pub results_object_id: String,
}

/// `[artifact.<id>]` section: a passive consumer (e.g. a report or
/// dashboard) that never executes but whose `lastUpdated` stamp follows the
/// modules it reads from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default)]
    pub sources: Vec<ArtifactSource>,
}
