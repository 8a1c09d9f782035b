//! Configuration management for quartermaster.
//!
//! The configuration file is hierarchical: global scalars at the top,
//! `[group:<name>]` sections, and `[[<group>.<component>]]` process
//! sections inside a group. A process section whose header carries a
//! `:<clones>` suffix is expanded into one configuration per instance.
//! Attribute lookup walks the process section, the enclosing group section
//! and the global scope, in that order.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

use crate::error::SupervisorError;
use crate::expr;

/// Pattern every component identifier must match: `group.component` with an
/// optional `_<instance>` suffix.
pub fn uid_pattern() -> &'static Regex {
    static UID_RE: OnceLock<Regex> = OnceLock::new();
    UID_RE.get_or_init(|| Regex::new(r"^\w+\.\w+$|^\w+\.\w+_\d+$").unwrap())
}

fn var_token_pattern() -> &'static Regex {
    static VAR_RE: OnceLock<Regex> = OnceLock::new();
    VAR_RE.get_or_init(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)|%(\w+)%").unwrap())
}

/// Registered process types. New types are added with one entry here.
const TYPE_REGISTRY: &[(&str, ProcessKind)] = &[
    ("cmd", ProcessKind::Command),
    ("q", ProcessKind::Q),
    ("b", ProcessKind::QBatch),
];

/// Tag selecting which configuration and status semantics a process uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// Plain command process.
    Command,
    /// Interactive q process with port arithmetic and library flags.
    Q,
    /// q batch process, expected to run to completion.
    QBatch,
}

impl ProcessKind {
    /// Resolves a `typeid` tag against the registry.
    pub fn from_typeid(typeid: &str) -> Option<Self> {
        TYPE_REGISTRY
            .iter()
            .find(|(tag, _)| *tag == typeid)
            .map(|(_, kind)| *kind)
    }

    /// Returns true for the q-flavoured kinds.
    pub fn is_q(&self) -> bool {
        matches!(self, ProcessKind::Q | ProcessKind::QBatch)
    }
}

/// A raw configuration value: a single scalar or a comma-separated list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// Single string value.
    Scalar(String),
    /// List value.
    List(Vec<String>),
}

/// One mapping of attribute names to raw values.
pub type Scope = BTreeMap<String, RawValue>;

/// q-specific settings attached to a process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QSettings {
    /// Effective listening port; negative means multithreaded input mode.
    pub port: i64,
    /// Whether the port sign was flipped for multithreaded input.
    pub multithreaded: bool,
    /// Process-specific libraries passed via `-libs`.
    pub libs: Vec<String>,
    /// Shared libraries passed via `-commonLibs`.
    pub common_libs: Vec<String>,
    /// Workspace memory cap in MB passed via `-w`.
    pub mem_cap: Option<i64>,
    /// Single-character auth flag (e.g. `U` or `u`).
    pub u_opt: Option<String>,
    /// Auth file passed along with the auth flag.
    pub u_file: Option<PathBuf>,
    /// Directory prepended to the child `PATH`.
    pub q_path: Option<String>,
    /// Published to the child as `QHOME`.
    pub q_home: Option<String>,
}

/// Immutable launch configuration for a single managed process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfiguration {
    /// Unique identifier `group.component[_instance]`.
    pub uid: String,
    /// Namespace part of the uid.
    pub group: String,
    /// Component part of the uid.
    pub component: String,
    /// Clone instance number, when expanded from a `:<clones>` header.
    pub instance: Option<u32>,
    /// Registered type tag, e.g. `cmd`, `q`, `b`.
    pub typeid: String,
    /// Registry-resolved process kind.
    pub kind: ProcessKind,
    /// Command used to start the process.
    pub command: String,
    /// Extra arguments appended to the command.
    pub command_args: Option<String>,
    /// Identifiers that must be alive before this process starts.
    pub requires: BTreeSet<String>,
    /// Working directory for the launched process.
    pub bin_path: PathBuf,
    /// Directory for process data; created on initialisation.
    pub data_path: PathBuf,
    /// Directory receiving the timestamped std stream files.
    pub log_path: PathBuf,
    /// Cpu ids the process is pinned to; empty means unpinned.
    pub cpu_affinity: Vec<usize>,
    /// Seconds to wait after spawn before the start is considered good.
    pub start_wait: f64,
    /// Grace period between terminate and force kill.
    pub stop_wait: f64,
    /// OS users allowed to start the process; empty means anyone.
    pub sys_user: Vec<String>,
    /// Exported `EC_*` environment entries.
    pub env: BTreeMap<String, String>,
    /// Internal variables available to expansion and the child environment.
    pub vars: BTreeMap<String, String>,
    /// q-specific settings, present for q-flavoured kinds.
    pub q: Option<QSettings>,
}

impl ProcessConfiguration {
    /// Returns the full command line used to start the process.
    ///
    /// For q processes the flag order is part of the external contract:
    /// `command [args] [-commonLibs …] [-libs …] [-p PORT] [-w MEMCAP]
    /// [-UOPT UFILE]`.
    pub fn full_cmd(&self) -> String {
        let mut cmd = self.command.clone();

        if let Some(args) = &self.command_args
            && !args.is_empty()
        {
            cmd.push(' ');
            cmd.push_str(args);
        }

        if let Some(q) = &self.q {
            if !q.common_libs.is_empty() {
                cmd.push_str(&format!(" -commonLibs {}", q.common_libs.join(" ")));
            }
            if !q.libs.is_empty() {
                cmd.push_str(&format!(" -libs {}", q.libs.join(" ")));
            }
            if q.port != 0 {
                cmd.push_str(&format!(" -p {}", q.port));
            }
            if let Some(cap) = q.mem_cap
                && cap > 0
            {
                cmd.push_str(&format!(" -w {cap}"));
            }
            if let Some(opt) = &q.u_opt
                && let Some(file) = &q.u_file
            {
                cmd.push_str(&format!(" -{} {}", opt, file.display()));
            }
        }

        cmd
    }
}

/// A fully loaded configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Configurations keyed by uid.
    pub processes: HashMap<String, ProcessConfiguration>,
    /// Uids in configuration insertion order.
    pub order: Vec<String>,
    /// Declared groups and their member uids, in section order.
    pub groups: BTreeMap<String, Vec<String>>,
    /// Distinct namespace (group part) values across all uids.
    pub namespaces: BTreeSet<String>,
}

/// Converts a camelCase attribute name to UPPER_SNAKE form for env export.
///
/// Two passes: the first breaks before a capitalized word (also after an
/// acronym run, as in `HTTPServer`), the second breaks every plain
/// lower-to-upper transition.
pub fn to_upper_snake(value: &str) -> String {
    static WORD_BREAK: OnceLock<Regex> = OnceLock::new();
    static CASE_BREAK: OnceLock<Regex> = OnceLock::new();
    let word_break =
        WORD_BREAK.get_or_init(|| Regex::new(r"(.)([A-Z][a-z]+)").unwrap());
    let case_break =
        CASE_BREAK.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

    let subbed = word_break.replace_all(value, "${1}_${2}");
    case_break
        .replace_all(&subbed, "${1}_${2}")
        .replace("__", "_")
        .to_uppercase()
}

fn parse_bool(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "f" | "n" | "0" | ""
    )
}

fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        if (bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\'')
        {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn parse_raw_value(raw: &str) -> RawValue {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    let quoted = trimmed.len() >= 2
        && ((bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\''));

    if quoted {
        RawValue::Scalar(strip_quotes(trimmed).to_string())
    } else if trimmed.contains(',') {
        RawValue::List(
            trimmed
                .split(',')
                .map(|item| strip_quotes(item).to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        )
    } else {
        RawValue::Scalar(trimmed.to_string())
    }
}

#[derive(Debug, Default)]
struct GroupSection {
    name: String,
    scope: Scope,
    // (header, scope) pairs in file order
    processes: Vec<(String, Scope)>,
}

#[derive(Debug, Default)]
struct ConfigFile {
    globals: Scope,
    groups: Vec<GroupSection>,
}

fn configuration_error(message: impl Into<String>) -> SupervisorError {
    SupervisorError::ConfigurationError(message.into())
}

fn parse_file(content: &str) -> Result<ConfigFile, SupervisorError> {
    let mut file = ConfigFile::default();
    // (group index, process index) of the section currently receiving keys
    let mut cursor: Option<(usize, Option<usize>)> = None;

    for (number, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if trimmed.starts_with("[[") {
            let header = trimmed
                .strip_prefix("[[")
                .and_then(|rest| rest.strip_suffix("]]"))
                .ok_or_else(|| {
                    configuration_error(format!(
                        "malformed section header on line {}: {trimmed}",
                        number + 1
                    ))
                })?
                .trim();
            let group_index = match cursor {
                Some((group, _)) => group,
                None => {
                    return Err(configuration_error(format!(
                        "process section '{header}' outside of any group (line {})",
                        number + 1
                    )));
                }
            };
            file.groups[group_index]
                .processes
                .push((header.to_string(), Scope::new()));
            let process_index = file.groups[group_index].processes.len() - 1;
            cursor = Some((group_index, Some(process_index)));
        } else if trimmed.starts_with('[') {
            let header = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| {
                    configuration_error(format!(
                        "malformed section header on line {}: {trimmed}",
                        number + 1
                    ))
                })?
                .trim();
            let name = header.strip_prefix("group:").ok_or_else(|| {
                configuration_error(format!(
                    "expected 'group:<name>' section header, found '{header}'"
                ))
            })?;
            if name.is_empty() {
                return Err(configuration_error("empty group name"));
            }
            file.groups.push(GroupSection {
                name: name.to_string(),
                ..GroupSection::default()
            });
            cursor = Some((file.groups.len() - 1, None));
        } else if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim().to_string();
            let value = parse_raw_value(value);
            match cursor {
                None => {
                    file.globals.insert(key, value);
                }
                Some((group, None)) => {
                    file.groups[group].scope.insert(key, value);
                }
                Some((group, Some(process))) => {
                    file.groups[group].processes[process].1.insert(key, value);
                }
            }
        } else {
            return Err(configuration_error(format!(
                "cannot parse line {}: {trimmed}",
                number + 1
            )));
        }
    }

    Ok(file)
}

/// Clone suffix of a process header: a count or an explicit instance list.
fn parse_clones(suffix: &str) -> Result<Vec<u32>, SupervisorError> {
    let trimmed = suffix.trim();
    if let Some(inner) = trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        inner
            .split(',')
            .map(|item| {
                item.trim().parse::<u32>().map_err(|_| {
                    configuration_error(format!("invalid clone instance '{item}'"))
                })
            })
            .collect()
    } else {
        let count: u32 = trimmed
            .parse()
            .map_err(|_| configuration_error(format!("invalid clone count '{trimmed}'")))?;
        if count == 0 {
            return Err(configuration_error("clone count must be positive"));
        }
        Ok((0..count).collect())
    }
}

/// Attribute lookup and variable expansion over a stack of scopes.
struct AttributeResolver<'a> {
    uid: String,
    scopes: [&'a Scope; 3],
    vars: BTreeMap<String, String>,
}

impl<'a> AttributeResolver<'a> {
    /// Returns the first raw hit for `attr` across the scope stack. A scalar
    /// equal to `NULL` (case-insensitive) or the empty string counts as
    /// explicitly absent.
    fn raw(&self, attr: &str) -> Option<&'a RawValue> {
        for scope in &self.scopes {
            if let Some(value) = scope.get(attr) {
                if let RawValue::Scalar(s) = value
                    && (s.is_empty() || s.eq_ignore_ascii_case("NULL"))
                {
                    return None;
                }
                return Some(value);
            }
        }
        None
    }

    /// Expands variable references against `vars` plus extras, then the
    /// process environment. Any surviving token is a configuration error.
    fn expand_with(
        &self,
        value: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<String, SupervisorError> {
        let expanded = var_token_pattern().replace_all(value, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if let Some(v) = extra.get(name) {
                v.clone()
            } else if let Some(v) = self.vars.get(name) {
                v.clone()
            } else if let Ok(v) = env::var(name) {
                v
            } else {
                caps[0].to_string()
            }
        });

        if var_token_pattern().is_match(&expanded) {
            return Err(SupervisorError::UnresolvedVariable {
                uid: self.uid.clone(),
                value: expanded.into_owned(),
            });
        }
        Ok(expanded.into_owned())
    }

    fn expand(&self, value: &str) -> Result<String, SupervisorError> {
        self.expand_with(value, &BTreeMap::new())
    }

    fn value(&self, attr: &str) -> Result<Option<String>, SupervisorError> {
        match self.raw(attr) {
            None => Ok(None),
            Some(RawValue::Scalar(s)) => Ok(Some(self.expand(s)?)),
            Some(RawValue::List(items)) => {
                // A scalar read of a list value joins it back together.
                let joined = items.join(",");
                Ok(Some(self.expand(&joined)?))
            }
        }
    }

    fn required(&self, attr: &str) -> Result<String, SupervisorError> {
        self.value(attr)?.ok_or_else(|| SupervisorError::MissingAttribute {
            uid: self.uid.clone(),
            attr: attr.to_string(),
        })
    }

    fn list(&self, attr: &str) -> Result<Vec<String>, SupervisorError> {
        match self.raw(attr) {
            None => Ok(Vec::new()),
            Some(RawValue::Scalar(s)) => Ok(vec![self.expand(s)?]),
            Some(RawValue::List(items)) => items
                .iter()
                .map(|item| self.expand(item))
                .collect::<Result<Vec<_>, _>>(),
        }
    }

    fn path(&self, attr: &str) -> Result<PathBuf, SupervisorError> {
        Ok(self
            .value(attr)?
            .map(|p| PathBuf::from(p.replace('\\', "/")))
            .unwrap_or_else(|| PathBuf::from(".")))
    }

    fn float(&self, attr: &str, default: f64) -> Result<f64, SupervisorError> {
        match self.value(attr)? {
            None => Ok(default),
            Some(s) => {
                let parsed: f64 = s.trim().parse().map_err(|_| {
                    configuration_error(format!(
                        "component '{}': '{attr}' is not a number: {s}",
                        self.uid
                    ))
                })?;
                if parsed < 0.0 {
                    return Err(configuration_error(format!(
                        "component '{}': '{attr}' must not be negative",
                        self.uid
                    )));
                }
                Ok(parsed)
            }
        }
    }

    /// Builds the exported `EC_*` environment from the `export` key list.
    fn export_env(&self) -> Result<BTreeMap<String, String>, SupervisorError> {
        let mut env = BTreeMap::new();
        for key in self.list("export")? {
            let value = match self.raw(&key) {
                None => String::new(),
                Some(RawValue::Scalar(s)) => self.expand(s)?,
                Some(RawValue::List(items)) => self.expand(&items.join(","))?,
            };
            env.insert(format!("EC_{}", to_upper_snake(&key)), value);
        }
        Ok(env)
    }
}

fn parse_type_vars(type_raw: &str, vars: &mut BTreeMap<String, String>) -> String {
    let mut parts = type_raw.splitn(2, ':');
    let typeid = parts.next().unwrap_or_default().trim().to_string();
    let (pkg, subtype) = match parts.next() {
        None => (String::new(), String::new()),
        Some(qualifier) => match qualifier.split_once('/') {
            None => (String::new(), qualifier.trim().to_string()),
            Some((pkg, subtype)) => (pkg.trim().to_string(), subtype.trim().to_string()),
        },
    };
    vars.insert("EC_COMPONENT_PKG".into(), pkg);
    vars.insert("EC_COMPONENT_TYPE".into(), subtype);
    typeid
}

fn parse_q_settings(
    resolver: &AttributeResolver<'_>,
    group_scope: &Scope,
    globals: &Scope,
) -> Result<QSettings, SupervisorError> {
    let multithreaded = resolver
        .value("multithreaded")?
        .map(|v| parse_bool(&v))
        .unwrap_or(false);

    // basePort is looked up in the group scope, then the global scope; the
    // process section cannot override it, only reference it from `port`.
    let base_port_raw = match group_scope.get("basePort").or_else(|| globals.get("basePort"))
    {
        Some(RawValue::Scalar(s)) => Some(resolver.expand(s)?),
        Some(RawValue::List(_)) => {
            return Err(configuration_error(format!(
                "component '{}': basePort must be a scalar",
                resolver.uid
            )));
        }
        None => None,
    };
    let base_port = match base_port_raw {
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
            configuration_error(format!(
                "component '{}': basePort is not an integer: {raw}",
                resolver.uid
            ))
        })?,
        None => 0,
    };

    let mut extra = BTreeMap::new();
    extra.insert("basePort".to_string(), base_port.to_string());
    let port = match resolver.raw("port") {
        None => base_port,
        Some(RawValue::List(_)) => {
            return Err(configuration_error(format!(
                "component '{}': port must be an expression",
                resolver.uid
            )));
        }
        Some(RawValue::Scalar(s)) => {
            let expression = resolver.expand_with(s, &extra)?;
            expr::evaluate(&expression, base_port).map_err(|err| {
                configuration_error(format!(
                    "component '{}': invalid port expression '{expression}': {err}",
                    resolver.uid
                ))
            })?
        }
    };
    let port = if port != 0 && multithreaded { -port } else { port };

    let mem_cap = match resolver.value("memCap")? {
        None => None,
        Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
            configuration_error(format!(
                "component '{}': memCap is not an integer: {raw}",
                resolver.uid
            ))
        })?),
    };

    let u_opt = resolver.value("uOpt")?;
    if let Some(opt) = &u_opt
        && opt.len() != 1
    {
        return Err(configuration_error(format!(
            "component '{}': uOpt must be a single character, found '{opt}'",
            resolver.uid
        )));
    }
    let u_file = resolver
        .value("uFile")?
        .map(|f| PathBuf::from(f.replace('\\', "/")));
    if u_opt.is_some() && u_file.is_none() {
        return Err(SupervisorError::MissingAttribute {
            uid: resolver.uid.clone(),
            attr: "uFile".into(),
        });
    }

    let q_home = resolver.value("qHome")?;

    Ok(QSettings {
        port,
        multithreaded,
        libs: resolver.list("libs")?,
        common_libs: resolver.list("commonLibs")?,
        mem_cap,
        u_opt,
        u_file,
        q_path: resolver.value("qPath")?,
        q_home,
    })
}

fn parse_process(
    group: &str,
    component: &str,
    instance: Option<u32>,
    process_scope: &Scope,
    group_scope: &Scope,
    globals: &Scope,
) -> Result<ProcessConfiguration, SupervisorError> {
    let uid = match instance {
        None => format!("{group}.{component}"),
        Some(i) => format!("{group}.{component}_{i}"),
    };
    if !uid_pattern().is_match(&uid) {
        return Err(SupervisorError::InvalidIdentifier { uid });
    }

    let mut vars = BTreeMap::new();
    vars.insert("EC_COMPONENT_ID".into(), uid.clone());
    vars.insert("EC_COMPONENT".into(), component.to_string());
    vars.insert("EC_GROUP".into(), group.to_string());
    vars.insert(
        "EC_COMPONENT_INSTANCE".into(),
        instance.map(|i| i.to_string()).unwrap_or_default(),
    );

    let type_raw = match process_scope
        .get("type")
        .or_else(|| group_scope.get("type"))
        .or_else(|| globals.get("type"))
    {
        Some(RawValue::Scalar(s)) => s.clone(),
        _ => {
            return Err(SupervisorError::MissingAttribute {
                uid,
                attr: "type".into(),
            });
        }
    };
    let typeid = parse_type_vars(&type_raw, &mut vars);
    let kind = ProcessKind::from_typeid(&typeid).ok_or_else(|| {
        configuration_error(format!("component '{uid}': unknown type '{typeid}'"))
    })?;

    let mut resolver = AttributeResolver {
        uid: uid.clone(),
        scopes: [process_scope, group_scope, globals],
        vars,
    };

    let command = resolver.required("command")?;
    let command_args = resolver.value("commandArgs")?;

    let requires: BTreeSet<String> = resolver
        .list("requires")?
        .into_iter()
        .map(|entry| {
            if uid_pattern().is_match(&entry) {
                entry
            } else {
                format!("{group}.{entry}")
            }
        })
        .collect();

    let bin_path = resolver.path("binPath")?;
    let data_path = resolver.path("dataPath")?;
    let log_path = resolver.path("logPath")?;

    let cpu_affinity = resolver
        .list("cpuAffinity")?
        .into_iter()
        .map(|cpu| {
            cpu.trim().parse::<usize>().map_err(|_| {
                configuration_error(format!(
                    "component '{uid}': invalid cpu id '{cpu}' in cpuAffinity"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let start_wait = resolver.float("startWait", 1.0)?;
    let stop_wait = resolver.float("stopWait", 1.0)?;
    let sys_user = resolver.list("sysUser")?;
    let env = resolver.export_env()?;

    let q = if kind.is_q() {
        Some(parse_q_settings(&resolver, group_scope, globals)?)
    } else {
        None
    };
    // qHome doubles as the QHOME variable seen by the child.
    if let Some(settings) = &q
        && let Some(home) = &settings.q_home
    {
        resolver.vars.insert("QHOME".into(), home.clone());
    }

    Ok(ProcessConfiguration {
        uid,
        group: group.to_string(),
        component: component.to_string(),
        instance,
        typeid,
        kind,
        command,
        command_args,
        requires,
        bin_path,
        data_path,
        log_path,
        cpu_affinity,
        start_wait,
        stop_wait,
        sys_user,
        env,
        vars: resolver.vars,
        q,
    })
}

/// Loads and evaluates a configuration file.
pub fn load_config(path: &Path) -> Result<Config, SupervisorError> {
    let content = fs::read_to_string(path).map_err(|e| {
        SupervisorError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;
    load_config_str(&content)
}

/// Loads a configuration from an in-memory string. Exposed for tests and
/// embedding callers.
pub fn load_config_str(content: &str) -> Result<Config, SupervisorError> {
    let file = parse_file(content)?;

    let mut config = Config {
        processes: HashMap::new(),
        order: Vec::new(),
        groups: BTreeMap::new(),
        namespaces: BTreeSet::new(),
    };

    for section in &file.groups {
        let members = config.groups.entry(section.name.clone()).or_default();

        for (header, scope) in &section.processes {
            let type_raw = match scope
                .get("type")
                .or_else(|| section.scope.get("type"))
                .or_else(|| file.globals.get("type"))
            {
                Some(RawValue::Scalar(s)) => s.clone(),
                _ => {
                    return Err(SupervisorError::MissingAttribute {
                        uid: header.clone(),
                        attr: "type".into(),
                    });
                }
            };
            let typeid = type_raw.split(':').next().unwrap_or_default().trim();
            // Helper sections provide shared attributes but no process.
            if typeid == "c" {
                continue;
            }

            let (name, clones) = match header.split_once(':') {
                None => (header.as_str(), None),
                Some((name, clones)) => (name.trim(), Some(parse_clones(clones)?)),
            };
            let (group_part, component) = name.split_once('.').ok_or_else(|| {
                configuration_error(format!(
                    "process header '{header}' is not of the form group.component"
                ))
            })?;

            let instances: Vec<Option<u32>> = match clones {
                None => vec![None],
                Some(list) => list.into_iter().map(Some).collect(),
            };

            for instance in instances {
                let process = parse_process(
                    group_part,
                    component,
                    instance,
                    scope,
                    &section.scope,
                    &file.globals,
                )?;
                if config.processes.contains_key(&process.uid) {
                    return Err(configuration_error(format!(
                        "duplicate component identifier '{}'",
                        process.uid
                    )));
                }
                members.push(process.uid.clone());
                config.namespaces.insert(process.group.clone());
                config.order.push(process.uid.clone());
                config.processes.insert(process.uid.clone(), process);
            }
        }
    }

    config.groups.retain(|_, members| !members.is_empty());
    Ok(config)
}
