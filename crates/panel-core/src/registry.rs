//! Function registry and dispatcher.
//!
//! The document declares function groups by id. At startup the firmware
//! builds a [`CallableTable`] mapping ids to implementations; a
//! [`FunctionRegistry`] joins the two, and the [`Dispatcher`] coerces raw
//! request strings to typed arguments and invokes the target.
//!
//! The catalog mutations ([`reorder`], [`remove`], [`update_doc`]) work on
//! the stored document through [`ConfigStore::update`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ConfigStore;
use crate::error::{DispatchError, PanelError, PanelResult};
use crate::model::{Config, FunctionDecl, ParamDecl, ParamType, PresentationType};

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Ints widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(v) => Some(*v),
            ArgValue::Str(_) => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::Str(s) => f.write_str(s),
        }
    }
}

/// An invocable target.
pub trait Callable: Send + Sync {
    fn call(&self, args: &[ArgValue]) -> PanelResult<String>;
}

impl<F> Callable for F
where
    F: Fn(&[ArgValue]) -> PanelResult<String> + Send + Sync,
{
    fn call(&self, args: &[ArgValue]) -> PanelResult<String> {
        self(args)
    }
}

/// One entry of the callable table.
#[derive(Clone)]
pub struct Registration {
    pub id: String,
    pub target: Arc<dyn Callable>,
    /// Cannot be removed from the catalog, and is dispatchable even when
    /// the document does not declare it.
    pub protected: bool,
    /// Runs only after the response has been written and the connection closed.
    pub after_response: bool,
    /// Declaration used when generating the default document.
    pub decl: FunctionDecl,
}

impl Registration {
    pub fn new(id: &str, decl: FunctionDecl, target: impl Callable + 'static) -> Self {
        Self {
            id: id.to_string(),
            target: Arc::new(target),
            protected: false,
            after_response: false,
            decl,
        }
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn after_response(mut self) -> Self {
        self.after_response = true;
        self
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("protected", &self.protected)
            .field("after_response", &self.after_response)
            .finish()
    }
}

/// Static id -> implementation table, built once at startup.
#[derive(Debug, Default, Clone)]
pub struct CallableTable {
    order: Vec<String>,
    entries: BTreeMap<String, Registration>,
}

impl CallableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a registration. Replacing keeps the original position.
    pub fn register(&mut self, registration: Registration) {
        if !self.entries.contains_key(&registration.id) {
            self.order.push(registration.id.clone());
        }
        self.entries.insert(registration.id.clone(), registration);
    }

    pub fn with(mut self, registration: Registration) -> Self {
        self.register(registration);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Registration> {
        self.entries.get(id)
    }

    pub fn is_protected(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|r| r.protected)
    }

    /// Ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Document declaring every registration in registration order, with
    /// default WiFi settings.
    pub fn default_config(&self) -> Config {
        let mut config = Config::default();
        for id in &self.order {
            if let Some(reg) = self.entries.get(id) {
                config.declare(id, reg.decl.clone());
            }
        }
        config
    }
}

/// A declared function joined with its implementation.
#[derive(Clone)]
pub struct FunctionSpec {
    pub id: String,
    pub name: String,
    pub kind: PresentationType,
    pub doc: String,
    pub parameters: Vec<ParamDecl>,
    pub target: Option<Arc<dyn Callable>>,
    pub protected: bool,
    pub after_response: bool,
}

impl FunctionSpec {
    fn from_decl(id: &str, decl: &FunctionDecl, registration: Option<&Registration>) -> Self {
        Self {
            id: id.to_string(),
            name: decl.name.clone(),
            kind: decl.kind,
            doc: decl.doc.clone(),
            parameters: decl.parameters.clone(),
            target: registration.map(|r| r.target.clone()),
            protected: registration.is_some_and(|r| r.protected),
            after_response: registration.is_some_and(|r| r.after_response),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parameters", &self.parameters)
            .field("resolved", &self.target.is_some())
            .field("protected", &self.protected)
            .field("after_response", &self.after_response)
            .finish()
    }
}

/// Ordered view of the document's function groups.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    order: Vec<String>,
    specs: BTreeMap<String, FunctionSpec>,
    /// Protected registrations the document does not declare.
    builtins: BTreeMap<String, FunctionSpec>,
}

impl FunctionRegistry {
    /// Join a document with the callable table.
    ///
    /// Consistency problems are not fixed here (the store logs them on load);
    /// the page shows an error block for every dangling id.
    pub fn build(config: &Config, table: &CallableTable) -> Self {
        let specs: BTreeMap<String, FunctionSpec> = config
            .functions
            .iter()
            .map(|(id, decl)| (id.clone(), FunctionSpec::from_decl(id, decl, table.get(id))))
            .collect();

        let builtins = table
            .entries
            .values()
            .filter(|r| r.protected && !specs.contains_key(&r.id))
            .map(|r| (r.id.clone(), FunctionSpec::from_decl(&r.id, &r.decl, Some(r))))
            .collect();

        Self {
            order: config.function_list.clone(),
            specs,
            builtins,
        }
    }

    /// Look up a declared function, falling back to undeclared protected built-ins.
    pub fn get(&self, id: &str) -> Option<&FunctionSpec> {
        self.specs.get(id).or_else(|| self.builtins.get(id))
    }

    /// Ids in panel order, each with its declaration if one exists.
    pub fn ordered(&self) -> impl Iterator<Item = (&str, Option<&FunctionSpec>)> {
        self.order.iter().map(|id| (id.as_str(), self.specs.get(id)))
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Coerce one raw request string to the declared type.
pub fn coerce(param: &ParamDecl, raw: &str) -> Result<ArgValue, DispatchError> {
    let fail = || DispatchError::Coercion {
        param: param.name.clone(),
        value: raw.to_string(),
        expected: param.param_type.as_str(),
    };
    match param.param_type {
        ParamType::String => Ok(ArgValue::Str(raw.to_string())),
        ParamType::Int => raw.trim().parse::<i64>().map(ArgValue::Int).map_err(|_| fail()),
        ParamType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(ArgValue::Float)
            .ok_or_else(fail),
    }
}

/// A resolved function with coerced arguments, ready to run.
pub struct Invocation {
    pub spec: FunctionSpec,
    pub args: Vec<ArgValue>,
}

impl Invocation {
    /// Coerce named arguments.
    ///
    /// Each declared parameter is looked up by name, then by its positional
    /// form key `arg<i>`; a missing value is the empty string.
    pub fn named(spec: FunctionSpec, raw: &HashMap<String, String>) -> Result<Self, DispatchError> {
        let args = spec
            .parameters
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let value = raw
                    .get(&param.name)
                    .or_else(|| raw.get(&format!("arg{}", i)))
                    .map(String::as_str)
                    .unwrap_or("");
                coerce(param, value)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { spec, args })
    }

    /// Coerce positional arguments; missing values are "".
    pub fn positional(spec: FunctionSpec, raw: &[String]) -> Result<Self, DispatchError> {
        let args = spec
            .parameters
            .iter()
            .enumerate()
            .map(|(i, param)| coerce(param, raw.get(i).map(String::as_str).unwrap_or("")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { spec, args })
    }

    /// Run the target. Errors and panics both come back as
    /// [`DispatchError::Target`].
    pub fn run(&self) -> Result<String, DispatchError> {
        let target = self
            .spec
            .target
            .as_ref()
            .ok_or_else(|| DispatchError::Unresolved(self.spec.id.clone()))?;

        debug!("Invoking '{}' with {} arguments", self.spec.id, self.args.len());
        match panic::catch_unwind(AssertUnwindSafe(|| target.call(&self.args))) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(PanelError::Dispatch(e @ DispatchError::Target(_)))) => Err(e),
            Ok(Err(e)) => Err(DispatchError::Target(e.to_string())),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Function '{}' panicked: {}", self.spec.id, message);
                Err(DispatchError::Target(message))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}

/// Resolves ids against the current document and invokes targets.
pub struct Dispatcher {
    store: Arc<ConfigStore>,
    table: Arc<CallableTable>,
}

impl Dispatcher {
    pub fn new(store: Arc<ConfigStore>, table: Arc<CallableTable>) -> Self {
        Self { store, table }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn table(&self) -> &Arc<CallableTable> {
        &self.table
    }

    /// Registry over the current document.
    pub fn registry(&self) -> PanelResult<FunctionRegistry> {
        Ok(FunctionRegistry::build(&self.store.load()?, &self.table))
    }

    pub fn resolve(&self, id: &str) -> PanelResult<FunctionSpec> {
        self.registry()?
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(id.to_string()).into())
    }

    /// Resolve `id` and bind named arguments, see [`Invocation::named`].
    pub fn prepare(&self, id: &str, raw: &HashMap<String, String>) -> PanelResult<Invocation> {
        Ok(Invocation::named(self.resolve(id)?, raw)?)
    }

    /// Resolve `id` and bind positional arguments.
    pub fn prepare_positional(&self, id: &str, raw: &[String]) -> PanelResult<Invocation> {
        Ok(Invocation::positional(self.resolve(id)?, raw)?)
    }

    pub fn execute(&self, id: &str, raw: &HashMap<String, String>) -> PanelResult<String> {
        Ok(self.prepare(id, raw)?.run()?)
    }

    pub fn execute_positional(&self, id: &str, raw: &[String]) -> PanelResult<String> {
        Ok(self.prepare_positional(id, raw)?.run()?)
    }
}

/// Reorder the panel.
///
/// `requested` is a comma-separated id list. An empty list returns the
/// current order without writing. Otherwise the list must be a permutation
/// of the current order; a mismatch is reported item by item.
pub fn reorder(store: &ConfigStore, requested: &str) -> PanelResult<String> {
    let wanted: Vec<String> = requested
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let current = store.load()?.function_list;
    if wanted.is_empty() {
        return Ok(current.join(","));
    }

    let mut problems = Vec::new();
    if wanted.len() != current.len() {
        problems.push(format!(
            "expected {} ids, got {}",
            current.len(),
            wanted.len()
        ));
    }

    let mut seen = BTreeSet::new();
    let duplicates: Vec<&str> = wanted
        .iter()
        .filter(|id| !seen.insert(id.as_str()))
        .map(String::as_str)
        .collect();
    if !duplicates.is_empty() {
        problems.push(format!("duplicate: {}", duplicates.join(", ")));
    }

    let missing: Vec<&str> = current
        .iter()
        .filter(|id| !wanted.contains(id))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        problems.push(format!("missing: {}", missing.join(", ")));
    }

    let extra: Vec<&str> = wanted
        .iter()
        .filter(|id| !current.contains(id))
        .map(String::as_str)
        .collect();
    if !extra.is_empty() {
        problems.push(format!("unknown: {}", extra.join(", ")));
    }

    if !problems.is_empty() {
        return Err(PanelError::validation(format!(
            "order rejected ({})",
            problems.join("; ")
        )));
    }

    if wanted == current {
        return Ok("order unchanged".to_string());
    }

    store.update(|config| {
        config.function_list = wanted;
        Ok(())
    })?;
    Ok("order saved".to_string())
}

/// Remove a function group from the catalog.
pub fn remove(store: &ConfigStore, table: &CallableTable, id: &str) -> PanelResult<String> {
    if table.is_protected(id) {
        return Err(DispatchError::Protected(id.to_string()).into());
    }

    let remaining = store.update(|config| {
        let listed = config.function_list.iter().any(|f| f == id);
        if config.functions.remove(id).is_none() && !listed {
            return Err(DispatchError::NotFound(id.to_string()).into());
        }
        config.function_list.retain(|f| f != id);
        Ok(config.function_list.len())
    })?;

    Ok(format!("removed '{}'; {} functions remain", id, remaining))
}

/// Replace the doc string of a declared function.
pub fn update_doc(store: &ConfigStore, id: &str, doc: &str) -> PanelResult<String> {
    store.update(|config| {
        let decl = config
            .functions
            .get_mut(id)
            .ok_or_else(|| PanelError::from(DispatchError::NotFound(id.to_string())))?;
        decl.doc = doc.to_string();
        Ok(())
    })?;
    Ok(format!("doc for '{}' updated", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStorage;
    use pretty_assertions::assert_eq;

    fn echo(args: &[ArgValue]) -> PanelResult<String> {
        Ok(args.iter().map(ToString::to_string).collect::<Vec<_>>().join("|"))
    }

    fn table() -> CallableTable {
        CallableTable::new()
            .with(Registration::new(
                "a",
                FunctionDecl::new("A", PresentationType::Function, "")
                    .param(ParamDecl::new("level", ParamType::Int))
                    .param(ParamDecl::new("gain", ParamType::Float))
                    .param(ParamDecl::new("label", ParamType::String)),
                echo,
            ))
            .with(Registration::new(
                "b",
                FunctionDecl::new("B", PresentationType::Show, ""),
                |_: &[ArgValue]| -> PanelResult<String> { panic!("sensor gone") },
            ))
            .with(Registration::new(
                "c",
                FunctionDecl::new("C", PresentationType::Rut, ""),
                |_: &[ArgValue]| -> PanelResult<String> {
                    Err(PanelError::validation("bad value"))
                },
            ))
            .with(
                Registration::new(
                    "status",
                    FunctionDecl::new("Status", PresentationType::Show, ""),
                    |_: &[ArgValue]| -> PanelResult<String> { Ok("ok".to_string()) },
                )
                .protected(),
            )
    }

    fn setup() -> (Arc<MemoryConfigStorage>, Dispatcher) {
        let table = table();
        let mut config = Config::default();
        for id in ["a", "b", "c"] {
            config.declare(id, table.get(id).unwrap().decl.clone());
        }
        let storage = Arc::new(MemoryConfigStorage::with_document(
            &serde_json::to_string(&config).unwrap(),
        ));
        let store = Arc::new(ConfigStore::new(storage.clone(), Config::default));
        (storage, Dispatcher::new(store, Arc::new(table)))
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_execute_coerces_named_and_positional() {
        let (_, dispatcher) = setup();
        let named = dispatcher
            .execute("a", &args(&[("level", "3"), ("gain", "0.5"), ("label", "x y")]))
            .unwrap();
        assert_eq!(named, "3|0.5|x y");

        let positional = dispatcher
            .execute_positional("a", &["7".to_string(), "1".to_string()])
            .unwrap();
        assert_eq!(positional, "7|1|");
    }

    #[test]
    fn test_coercion_failure_names_parameter() {
        let (_, dispatcher) = setup();
        let err = dispatcher
            .execute("a", &args(&[("arg0", "high"), ("arg1", "1")]))
            .unwrap_err();
        match err {
            PanelError::Dispatch(DispatchError::Coercion { param, expected, .. }) => {
                assert_eq!(param, "level");
                assert_eq!(expected, "int");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (_, dispatcher) = setup();
        let err = dispatcher.execute("zzz", &HashMap::new()).unwrap_err();
        assert!(matches!(err, PanelError::Dispatch(DispatchError::NotFound(_))));
    }

    #[test]
    fn test_target_error_and_panic_are_contained() {
        let (_, dispatcher) = setup();
        let err = dispatcher.execute("c", &HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "execution error: invalid input: bad value");

        let err = dispatcher.execute("b", &HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "execution error: sensor gone");
    }

    #[test]
    fn test_protected_builtin_dispatchable_when_undeclared() {
        let (_, dispatcher) = setup();
        assert_eq!(dispatcher.execute("status", &HashMap::new()).unwrap(), "ok");

        let registry = dispatcher.registry().unwrap();
        assert_eq!(registry.order(), ["a", "b", "c"]);
        assert!(registry.get("status").is_some());
    }

    #[test]
    fn test_registry_keeps_dangling_ids() {
        let mut config = Config::default();
        config.declare("a", FunctionDecl::new("A", PresentationType::Function, ""));
        config.declare("ghost", FunctionDecl::new("Ghost", PresentationType::Show, ""));
        config.function_list.push("missing".to_string());

        let registry = FunctionRegistry::build(&config, &table());
        let entries: Vec<(String, Option<bool>)> = registry
            .ordered()
            .map(|(id, spec)| (id.to_string(), spec.map(FunctionSpec::is_resolved)))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("a".to_string(), Some(true)),
                ("ghost".to_string(), Some(false)),
                ("missing".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_unresolved_target() {
        let mut config = Config::default();
        config.declare("ghost", FunctionDecl::new("Ghost", PresentationType::Show, ""));
        let store = Arc::new(ConfigStore::new(
            MemoryConfigStorage::with_document(&serde_json::to_string(&config).unwrap()),
            Config::default,
        ));
        let dispatcher = Dispatcher::new(store, Arc::new(CallableTable::new()));
        let err = dispatcher.execute("ghost", &HashMap::new()).unwrap_err();
        assert!(matches!(err, PanelError::Dispatch(DispatchError::Unresolved(_))));
    }

    #[test]
    fn test_empty_reorder_returns_current_order() {
        let (storage, dispatcher) = setup();
        assert_eq!(reorder(dispatcher.store(), "").unwrap(), "a,b,c");
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_reorder_saves_and_detects_unchanged() {
        let (storage, dispatcher) = setup();
        let store = dispatcher.store();

        assert_eq!(reorder(store, "a,b,c").unwrap(), "order unchanged");
        assert_eq!(storage.write_count(), 0);

        assert_eq!(reorder(store, "c, a ,b").unwrap(), "order saved");
        assert_eq!(storage.write_count(), 1);
        assert_eq!(store.load().unwrap().function_list, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_reorder_itemizes_mismatch() {
        let (storage, dispatcher) = setup();
        let store = dispatcher.store();

        let err = reorder(store, "a,b,x").unwrap_err().to_string();
        assert!(err.contains("missing: c"), "{err}");
        assert!(err.contains("unknown: x"), "{err}");

        let err = reorder(store, "a,b").unwrap_err().to_string();
        assert!(err.contains("expected 3 ids, got 2"), "{err}");

        let err = reorder(store, "a,a,b").unwrap_err().to_string();
        assert!(err.contains("duplicate: a"), "{err}");

        assert_eq!(storage.write_count(), 0);
        assert_eq!(store.load().unwrap().function_list, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove() {
        let (_, dispatcher) = setup();
        let store = dispatcher.store();
        let table = dispatcher.table();

        assert_eq!(remove(store, table, "b").unwrap(), "removed 'b'; 2 functions remain");
        let config = store.load().unwrap();
        assert_eq!(config.function_list, vec!["a", "c"]);
        assert!(!config.functions.contains_key("b"));
        assert!(config.is_consistent());

        let err = remove(store, table, "b").unwrap_err();
        assert!(matches!(err, PanelError::Dispatch(DispatchError::NotFound(_))));

        let err = remove(store, table, "status").unwrap_err();
        assert!(matches!(err, PanelError::Dispatch(DispatchError::Protected(_))));
    }

    #[test]
    fn test_remove_rolls_back_on_failed_save() {
        let (storage, dispatcher) = setup();
        storage.set_fail_writes(true);
        let err = remove(dispatcher.store(), dispatcher.table(), "a").unwrap_err();
        assert!(matches!(err, PanelError::Persistence { rolled_back: true, .. }));
        assert_eq!(dispatcher.store().load().unwrap().function_list, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_update_doc() {
        let (_, dispatcher) = setup();
        let store = dispatcher.store();
        update_doc(store, "a", "Sets the level").unwrap();
        assert_eq!(store.load().unwrap().functions["a"].doc, "Sets the level");
        assert!(update_doc(store, "nope", "x").is_err());
    }

    #[test]
    fn test_default_config_follows_registration_order() {
        let config = table().default_config();
        assert_eq!(config.function_list, vec!["a", "b", "c", "status"]);
        assert!(config.is_consistent());
    }

    #[test]
    fn test_float_coercion_rejects_non_finite() {
        let param = ParamDecl::new("gain", ParamType::Float);
        assert_eq!(coerce(&param, " 2.5 ").unwrap(), ArgValue::Float(2.5));
        assert!(coerce(&param, "inf").is_err());
        assert!(coerce(&param, "NaN").is_err());
    }
}
