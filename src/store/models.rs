use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a project. Transitions are enforced by the
/// orchestrator through compare-and-swap updates on the projects row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Idle,
    Indexing,
    Stopped,
    Completed,
    Failed,
    ReindexingFailed,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Idle => "idle",
            ProjectState::Indexing => "indexing",
            ProjectState::Stopped => "stopped",
            ProjectState::Completed => "completed",
            ProjectState::Failed => "failed",
            ProjectState::ReindexingFailed => "reindexing_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(ProjectState::Idle),
            "indexing" => Some(ProjectState::Indexing),
            "stopped" => Some(ProjectState::Stopped),
            "completed" => Some(ProjectState::Completed),
            "failed" => Some(ProjectState::Failed),
            "reindexing_failed" => Some(ProjectState::ReindexingFailed),
            _ => None,
        }
    }

    /// A job may start from these states without clobbering another run.
    pub fn can_start_indexing(&self) -> bool {
        matches!(
            self,
            ProjectState::Idle
                | ProjectState::Stopped
                | ProjectState::Completed
                | ProjectState::Failed
        )
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub root_path: PathBuf,
    pub language: String,
    /// Locale forwarded to the analysis gateway for generated descriptions.
    pub ui_locale: String,
    pub state: ProjectState,
    /// Resume cursor. Points at the last fully persisted file.
    pub last_indexed_file_path: Option<String>,
    pub current_file_path: Option<String>,
    pub status_message: Option<String>,
    pub total_files: u64,
    pub indexed_files: u64,
    pub total_entities: u64,
    /// Gateway tokens spent on this project, summed over all runs.
    pub tokens_used: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: i64,
    pub project_id: i64,
    pub path: PathBuf,
    pub rel_path: String,
    /// xxh3 of the file contents at the time it was indexed.
    pub content_hash: u64,
    pub indexed: bool,
    pub indexed_at: Option<i64>,
    pub entity_count: u64,
    /// Human readable note when the file was skipped or partially parsed.
    pub parse_warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Class,
    Interface,
    Trait,
    Method,
    Function,
    Constant,
    EnumCase,
    Closure,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Class => "class",
            EntityKind::Interface => "interface",
            EntityKind::Trait => "trait",
            EntityKind::Method => "method",
            EntityKind::Function => "function",
            EntityKind::Constant => "constant",
            EntityKind::EnumCase => "enum_case",
            EntityKind::Closure => "closure",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "class" => Some(EntityKind::Class),
            "interface" => Some(EntityKind::Interface),
            "trait" => Some(EntityKind::Trait),
            "method" => Some(EntityKind::Method),
            "function" => Some(EntityKind::Function),
            "constant" => Some(EntityKind::Constant),
            "enum_case" => Some(EntityKind::EnumCase),
            "closure" => Some(EntityKind::Closure),
            _ => None,
        }
    }

    /// Container kinds own members and participate in inheritance edges.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            EntityKind::Class | EntityKind::Interface | EntityKind::Trait
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "protected" => Some(Visibility::Protected),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// A code entity persisted by the extractor. Identity is stable across
/// reindexing runs: (file_id, full_qualified_name, kind) upserts in place so
/// incoming dependency edges keep valid targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub file_id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub full_qualified_name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub visibility: Visibility,
    pub code: String,
    /// Set when the last analysis attempt for this entity failed.
    pub analysis_failed: bool,
}

/// An unresolved reference emitted by the extractor, before the resolver
/// binds it to a concrete entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    pub kind: ReferenceKind,
    /// The textual target as it appears in source, possibly fully qualified.
    pub target: String,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Import,
    Extends,
    Implements,
    Uses,
    Calls,
    Instantiates,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Import => "import",
            ReferenceKind::Extends => "extends",
            ReferenceKind::Implements => "implements",
            ReferenceKind::Uses => "uses",
            ReferenceKind::Calls => "calls",
            ReferenceKind::Instantiates => "instantiates",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "import" => Some(ReferenceKind::Import),
            "extends" => Some(ReferenceKind::Extends),
            "implements" => Some(ReferenceKind::Implements),
            "uses" => Some(ReferenceKind::Uses),
            "calls" => Some(ReferenceKind::Calls),
            "instantiates" => Some(ReferenceKind::Instantiates),
            _ => None,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved (or deliberately unresolved) dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: i64,
    pub entity_id: i64,
    /// None when the target could not be resolved within the project.
    pub depends_on_entity_id: Option<i64>,
    /// Always kept, even when resolution succeeds, so unresolved edges stay
    /// meaningful and resolution can be re-run later.
    pub depends_on_name: String,
    pub kind: ReferenceKind,
    /// Resolution fell back to a name-only match across namespaces.
    pub low_confidence: bool,
}

/// Asymptotic complexity class estimated by the metrics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComplexityClass {
    #[default]
    Constant,
    Logarithmic,
    Linear,
    Linearithmic,
    Quadratic,
    Cubic,
    Exponential,
    Factorial,
}

impl ComplexityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityClass::Constant => "O(1)",
            ComplexityClass::Logarithmic => "O(log n)",
            ComplexityClass::Linear => "O(n)",
            ComplexityClass::Linearithmic => "O(n log n)",
            ComplexityClass::Quadratic => "O(n^2)",
            ComplexityClass::Cubic => "O(n^3)",
            ComplexityClass::Exponential => "O(2^n)",
            ComplexityClass::Factorial => "O(n!)",
        }
    }

    /// Ordinal used for sorting and threshold comparisons.
    pub fn rank(&self) -> u8 {
        match self {
            ComplexityClass::Constant => 1,
            ComplexityClass::Logarithmic => 2,
            ComplexityClass::Linear => 3,
            ComplexityClass::Linearithmic => 4,
            ComplexityClass::Quadratic => 5,
            ComplexityClass::Cubic => 6,
            ComplexityClass::Exponential => 7,
            ComplexityClass::Factorial => 8,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "O(1)" => Some(ComplexityClass::Constant),
            "O(log n)" => Some(ComplexityClass::Logarithmic),
            "O(n)" => Some(ComplexityClass::Linear),
            "O(n log n)" => Some(ComplexityClass::Linearithmic),
            "O(n^2)" => Some(ComplexityClass::Quadratic),
            "O(n^3)" => Some(ComplexityClass::Cubic),
            "O(2^n)" => Some(ComplexityClass::Exponential),
            "O(n!)" => Some(ComplexityClass::Factorial),
            _ => None,
        }
    }
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolidViolation {
    pub principle: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityIssueKind {
    SqlInjection,
    Xss,
    HardcodedSecret,
    WeakCrypto,
    PathTraversal,
    CommandInjection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIssue {
    pub kind: SecurityIssueKind,
    pub line: u32,
    pub detail: String,
}

/// Everything known about an entity after static metrics plus (optionally)
/// the analysis gateway. One row per entity, replaced on reanalysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub entity_id: i64,
    pub schema_version: u32,
    pub description: Option<String>,
    pub complexity: ComplexityClass,
    pub complexity_explanation: Option<String>,
    pub cyclomatic: u32,
    pub cognitive: u32,
    pub max_nesting_depth: u32,
    pub parameter_count: u32,
    pub lines_of_code: u32,
    /// Distinct external references over statements, 0 to 1.
    pub coupling_score: f64,
    pub cohesion_score: Option<f64>,
    pub solid_violations: Vec<SolidViolation>,
    pub design_patterns: Vec<String>,
    pub ddd_role: Option<String>,
    pub mvc_role: Option<String>,
    pub testability_score: Option<u32>,
    pub testability_issues: Vec<String>,
    pub security_issues: Vec<SecurityIssue>,
    pub has_n_plus_one: bool,
    pub is_god_object: bool,
    pub has_feature_envy: bool,
    pub long_parameter_list: bool,
    pub keywords: Vec<String>,
    /// Gateway tokens spent on this analysis; zero for metrics-only records.
    pub tokens_used: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AnalysisRecord {
    pub const SCHEMA_VERSION: u32 = 2;

    /// Static-metrics-only record, before any gateway result is merged in.
    pub fn from_metrics(entity_id: i64, metrics: crate::metrics::EntityMetrics) -> Self {
        let now = now_epoch();
        Self {
            entity_id,
            schema_version: Self::SCHEMA_VERSION,
            description: None,
            complexity: metrics.complexity,
            complexity_explanation: metrics.complexity_explanation,
            cyclomatic: metrics.cyclomatic,
            cognitive: metrics.cognitive,
            max_nesting_depth: metrics.max_nesting_depth,
            parameter_count: metrics.parameter_count,
            lines_of_code: metrics.lines_of_code,
            coupling_score: metrics.coupling_score,
            cohesion_score: metrics.cohesion_score,
            solid_violations: metrics.solid_violations,
            design_patterns: Vec::new(),
            ddd_role: None,
            mvc_role: None,
            testability_score: None,
            testability_issues: Vec::new(),
            security_issues: metrics.security_issues,
            has_n_plus_one: metrics.has_n_plus_one,
            is_god_object: metrics.is_god_object,
            has_feature_envy: metrics.has_feature_envy,
            long_parameter_list: metrics.long_parameter_list,
            keywords: Vec::new(),
            tokens_used: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Unix timestamp in seconds, the storage format for all timestamps.
pub fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
