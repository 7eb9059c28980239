//! Capability registry: validation, flattening and method ids.
//!
//! Registering a capability flattens its own methods and those of every
//! parent into one table and assigns each remote method a dense id, in
//! registration order. Two peers only agree on ids if they register the
//! same capabilities in the same order; [`CapabilityRegistry::fingerprint`]
//! lets a transport check that before any call is made.

use crate::capability::{Capability, MethodSpec, RefMarker};
use crate::error::{RmiError, RmiResult};
use crate::value::{Value, ValueType};
use parley_types::{MethodId, Policy};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Reserved id: the remote object's text form.
pub const DESCRIBE_METHOD: MethodId = MethodId(u32::MAX);
/// Reserved id: the remote object's identity hash.
pub const IDENTITY_HASH_METHOD: MethodId = MethodId(u32::MAX - 1);
/// Id carried by methods that only ever run locally (proxy delegates).
pub const LOCAL_METHOD: MethodId = MethodId(u32::MAX - 2);

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: ValueType,
    /// Passed by reference instead of by value.
    pub callback: bool,
}

#[derive(Debug, Clone)]
pub struct ResultInfo {
    pub ty: ValueType,
    /// Returned by reference instead of by value.
    pub remote: bool,
}

/// A method after flattening, with its id and effective policy.
#[derive(Debug)]
pub struct RemoteMethod {
    pub id: MethodId,
    pub name: String,
    /// The capability that declared the method.
    pub capability: String,
    pub params: Vec<ParamInfo>,
    pub result: ResultInfo,
    pub policy: Policy,
}

impl RemoteMethod {
    /// The value returned when a call produces no real result.
    pub fn default_result(&self) -> Value {
        self.result.ty.default_value()
    }

    pub fn is_builtin(&self) -> bool {
        self.id == DESCRIBE_METHOD || self.id == IDENTITY_HASH_METHOD
    }

    pub fn has_callbacks(&self) -> bool {
        self.params.iter().any(|p| p.callback)
    }

    fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}:{}{}", p.name, p.ty, if p.callback { "&" } else { "" }))
            .collect();
        format!(
            "{} {}.{}({}) -> {}{}",
            self.id.0,
            self.capability,
            self.name,
            params.join(","),
            self.result.ty,
            if self.result.remote { "&" } else { "" }
        )
    }

    fn builtin(id: MethodId, name: &str, ty: ValueType, global: &Policy) -> Self {
        let mut policy = global.clone();
        policy.non_blocking = false;
        policy.no_return = false;
        policy.closed = false;
        Self {
            id,
            name: name.to_string(),
            capability: "builtin".to_string(),
            params: Vec::new(),
            result: ResultInfo { ty, remote: false },
            policy,
        }
    }
}

/// A registered capability: its flattened method table.
#[derive(Debug)]
pub struct CapabilityInfo {
    name: String,
    functional: bool,
    policy: Policy,
    methods: Vec<Arc<RemoteMethod>>,
    by_name: HashMap<String, usize>,
    local_only: HashSet<String>,
}

impl CapabilityInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    /// Global policy with this capability's overrides applied.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Remote methods in id order.
    pub fn methods(&self) -> &[Arc<RemoteMethod>] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&Arc<RemoteMethod>> {
        self.by_name.get(name).map(|&i| &self.methods[i])
    }

    pub fn is_local_only(&self, name: &str) -> bool {
        self.local_only.contains(name)
    }

    /// True when `name` is declared at all, remote or local-only.
    pub fn declares(&self, name: &str) -> bool {
        self.by_name.contains_key(name) || self.local_only.contains(name)
    }
}

struct RegistryState {
    capabilities: HashMap<String, Arc<CapabilityInfo>>,
    order: Vec<String>,
    methods: Vec<Arc<RemoteMethod>>,
}

/// Thread-safe registry of capabilities and method ids.
pub struct CapabilityRegistry {
    global: Policy,
    describe: Arc<RemoteMethod>,
    identity_hash: Arc<RemoteMethod>,
    state: RwLock<RegistryState>,
}

impl CapabilityRegistry {
    pub fn new(global: Policy) -> Self {
        let describe = Arc::new(RemoteMethod::builtin(
            DESCRIBE_METHOD,
            "describe",
            ValueType::Text,
            &global,
        ));
        let identity_hash = Arc::new(RemoteMethod::builtin(
            IDENTITY_HASH_METHOD,
            "identity_hash",
            ValueType::Int,
            &global,
        ));
        Self {
            global,
            describe,
            identity_hash,
            state: RwLock::new(RegistryState {
                capabilities: HashMap::new(),
                order: Vec::new(),
                methods: Vec::new(),
            }),
        }
    }

    pub fn global_policy(&self) -> &Policy {
        &self.global
    }

    /// Register a capability and, after it, any capability it references
    /// that is not registered yet.
    ///
    /// Registration is all or nothing: if any capability in the chain is
    /// rejected, none of them stays registered.
    pub fn register(&self, capability: &Capability) -> RmiResult<Arc<CapabilityInfo>> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let (methods, order) = (state.methods.len(), state.order.len());
        let outcome = self.register_locked(&mut state, capability);
        if outcome.is_err() {
            for name in state.order.split_off(order) {
                state.capabilities.remove(&name);
            }
            state.methods.truncate(methods);
        }
        outcome
    }

    fn register_locked(
        &self,
        state: &mut RegistryState,
        capability: &Capability,
    ) -> RmiResult<Arc<CapabilityInfo>> {
        if state.capabilities.contains_key(capability.name()) {
            return Err(RmiError::DuplicateCapability(capability.name().to_string()));
        }
        let base = state.methods.len() as u32;
        let info = Arc::new(build(capability, &self.global, Some(base))?);

        state.methods.extend(info.methods.iter().cloned());
        state
            .capabilities
            .insert(info.name.clone(), Arc::clone(&info));
        state.order.push(info.name.clone());
        debug!(
            capability = %info.name,
            methods = info.methods.len(),
            first_id = base,
            "Registered capability"
        );

        for referenced in capability.referenced() {
            if !state.capabilities.contains_key(referenced.name()) {
                self.register_locked(state, referenced)?;
            }
        }
        Ok(info)
    }

    /// Flatten a capability without assigning ids or registering it.
    ///
    /// Used for proxy delegates, whose methods never cross the wire.
    pub fn describe_local(&self, capability: &Capability) -> RmiResult<Arc<CapabilityInfo>> {
        Ok(Arc::new(build(capability, &self.global, None)?))
    }

    pub fn capability(&self, name: &str) -> Option<Arc<CapabilityInfo>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.capabilities.get(name).cloned()
    }

    /// Look up a method by id, including the reserved ids.
    pub fn method(&self, id: MethodId) -> Option<Arc<RemoteMethod>> {
        if id == DESCRIBE_METHOD {
            return Some(Arc::clone(&self.describe));
        }
        if id == IDENTITY_HASH_METHOD {
            return Some(Arc::clone(&self.identity_hash));
        }
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.methods.get(id.0 as usize).cloned()
    }

    pub fn describe_method(&self) -> &Arc<RemoteMethod> {
        &self.describe
    }

    pub fn identity_hash_method(&self) -> &Arc<RemoteMethod> {
        &self.identity_hash
    }

    /// Registered capability names in registration order.
    pub fn capabilities(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.order.clone()
    }

    pub fn method_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.methods.len()
    }

    /// SHA-256 over every method signature in id order, hex encoded.
    pub fn fingerprint(&self) -> String {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut hasher = Sha256::new();
        for method in &state.methods {
            hasher.update(method.signature().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Own methods first, then parents depth-first; a parent reached twice
/// is flattened once.
fn flatten<'a>(
    capability: &'a Capability,
    visited: &mut HashSet<&'a str>,
    out: &mut Vec<(&'a Capability, &'a MethodSpec)>,
) {
    for method in capability.methods() {
        out.push((capability, method));
    }
    for parent in capability.parents() {
        if visited.insert(parent.name()) {
            flatten(parent, visited, out);
        }
    }
}

fn check_marker(
    owner: &str,
    method: &str,
    what: &str,
    ty: &ValueType,
    marker: RefMarker,
    referenced: Option<&Capability>,
) -> RmiResult<()> {
    match (ty, marker) {
        (ValueType::Object(_), RefMarker::None) => Err(RmiError::Config(format!(
            "{owner}.{method}: {what} has an object type but is not marked local or closure"
        ))),
        (_, RefMarker::Closure) if !referenced.is_some_and(|c| c.is_functional()) => {
            Err(RmiError::Config(format!(
                "{owner}.{method}: {what} is marked closure but its capability is not functional"
            )))
        }
        _ => Ok(()),
    }
}

fn build(
    capability: &Capability,
    global: &Policy,
    first_id: Option<u32>,
) -> RmiResult<CapabilityInfo> {
    let mut flat = Vec::new();
    let mut visited = HashSet::from([capability.name()]);
    flatten(capability, &mut visited, &mut flat);

    let mut declared_by: HashMap<&str, &str> = HashMap::new();
    for (owner, method) in &flat {
        if let Some(previous) = declared_by.insert(&method.name, owner.name()) {
            return Err(RmiError::Config(format!(
                "{}: method `{}` is declared by both {} and {}",
                capability.name(),
                method.name,
                previous,
                owner.name()
            )));
        }
        for param in &method.params {
            check_marker(
                owner.name(),
                &method.name,
                &format!("parameter `{}`", param.name),
                &param.ty,
                param.marker,
                param.referenced.as_deref(),
            )?;
        }
        check_marker(
            owner.name(),
            &method.name,
            "result",
            &method.result.ty,
            method.result.marker,
            method.result.referenced.as_deref(),
        )?;
    }

    let mut methods = Vec::new();
    let mut by_name = HashMap::new();
    let mut local_only = HashSet::new();
    for (owner, spec) in flat {
        let policy = Policy::resolve(global, owner.policy_override(), &spec.policy);
        if policy.call_local_only {
            local_only.insert(spec.name.clone());
            continue;
        }
        let id = match first_id {
            Some(base) => MethodId(base + methods.len() as u32),
            None => LOCAL_METHOD,
        };
        let params = spec
            .params
            .iter()
            .map(|p| ParamInfo {
                name: p.name.clone(),
                ty: p.ty.clone(),
                callback: p.marker != RefMarker::None,
            })
            .collect();
        let result = ResultInfo {
            ty: spec.result.ty.clone(),
            remote: spec.result.marker != RefMarker::None,
        };
        by_name.insert(spec.name.clone(), methods.len());
        methods.push(Arc::new(RemoteMethod {
            id,
            name: spec.name.clone(),
            capability: owner.name().to_string(),
            params,
            result,
            policy,
        }));
    }

    if capability.is_functional() && methods.len() != 1 {
        return Err(RmiError::Config(format!(
            "{} is functional but has {} remote methods",
            capability.name(),
            methods.len()
        )));
    }

    Ok(CapabilityInfo {
        name: capability.name().to_string(),
        functional: capability.is_functional(),
        policy: global.with(capability.policy_override()),
        methods,
        by_name,
        local_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::{ExceptionTransmission, PolicyOverride, TransportKind};

    fn consumer() -> Capability {
        Capability::new("IntConsumer")
            .functional()
            .method(MethodSpec::new("accept").param("value", ValueType::Int))
    }

    fn calculator() -> Capability {
        Capability::new("Calculator")
            .method(
                MethodSpec::new("add")
                    .param("a", ValueType::Int)
                    .param("b", ValueType::Int)
                    .returns(ValueType::Int),
            )
            .method(MethodSpec::new("sqrt").param("x", ValueType::Float).returns(ValueType::Float))
    }

    #[test]
    fn test_ids_are_dense_in_registration_order() {
        let registry = CapabilityRegistry::new(Policy::default());
        let calc = registry.register(&calculator()).unwrap();
        let cons = registry.register(&consumer()).unwrap();

        assert_eq!(calc.method("add").unwrap().id, MethodId(0));
        assert_eq!(calc.method("sqrt").unwrap().id, MethodId(1));
        assert_eq!(cons.method("accept").unwrap().id, MethodId(2));
        assert_eq!(registry.method_count(), 3);
        assert_eq!(registry.method(MethodId(2)).unwrap().name, "accept");
        assert!(registry.method(MethodId(3)).is_none());
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let registry = CapabilityRegistry::new(Policy::default());
        registry.register(&calculator()).unwrap();
        let err = registry.register(&calculator()).unwrap_err();
        assert!(matches!(err, RmiError::DuplicateCapability(name) if name == "Calculator"));
    }

    #[test]
    fn test_parents_flatten_after_own_methods() {
        let base = Capability::new("Base").method(MethodSpec::new("ping"));
        let left = Capability::new("Left").extends(&base).method(MethodSpec::new("left"));
        let right = Capability::new("Right").extends(&base).method(MethodSpec::new("right"));
        let child = Capability::new("Child")
            .method(MethodSpec::new("own"))
            .extends(&left)
            .extends(&right);

        let registry = CapabilityRegistry::new(Policy::default());
        let info = registry.register(&child).unwrap();
        let names: Vec<&str> = info.methods().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["own", "left", "ping", "right"]);
        assert_eq!(info.method("ping").unwrap().capability, "Base");
    }

    #[test]
    fn test_name_collision_is_an_error() {
        let a = Capability::new("A").method(MethodSpec::new("run"));
        let b = Capability::new("B").method(MethodSpec::new("run").param("x", ValueType::Int));
        let both = Capability::new("Both").extends(&a).extends(&b);
        let registry = CapabilityRegistry::new(Policy::default());
        let err = registry.register(&both).unwrap_err();
        assert!(matches!(err, RmiError::Config(msg) if msg.contains("`run`")));
        assert!(registry.capability("Both").is_none());
    }

    #[test]
    fn test_closure_marker_needs_functional_capability() {
        let registry = CapabilityRegistry::new(Policy::default());
        let bad = Capability::new("Bad").method(MethodSpec::new("each").closure("sink", &calculator()));
        assert!(matches!(registry.register(&bad), Err(RmiError::Config(_))));

        let unmarked = Capability::new("Unmarked")
            .method(MethodSpec::new("take").param("obj", ValueType::object("Calculator")));
        assert!(matches!(registry.register(&unmarked), Err(RmiError::Config(_))));
    }

    #[test]
    fn test_functional_needs_exactly_one_method() {
        let registry = CapabilityRegistry::new(Policy::default());
        let two = Capability::new("Two")
            .functional()
            .method(MethodSpec::new("a"))
            .method(MethodSpec::new("b"));
        assert!(matches!(registry.register(&two), Err(RmiError::Config(_))));

        // A local-only helper does not count.
        let one = Capability::new("One")
            .functional()
            .method(MethodSpec::new("a"))
            .method(MethodSpec::new("helper").local_only());
        let info = registry.register(&one).unwrap();
        assert!(info.is_functional());
        assert!(info.is_local_only("helper"));
        assert!(info.method("helper").is_none());
        assert!(info.declares("helper"));
    }

    #[test]
    fn test_referenced_capabilities_register_after() {
        let registry = CapabilityRegistry::new(Policy::default());
        let stream = Capability::new("Stream").method(MethodSpec::new("each").closure("sink", &consumer()));
        registry.register(&stream).unwrap();

        assert_eq!(registry.capabilities(), vec!["Stream", "IntConsumer"]);
        let accept = registry.capability("IntConsumer").unwrap();
        assert_eq!(accept.method("accept").unwrap().id, MethodId(1));

        let each = registry.capability("Stream").unwrap();
        let each = each.method("each").unwrap();
        assert!(each.params[0].callback);
        assert!(each.has_callbacks());
    }

    #[test]
    fn test_rejected_reference_undoes_registration() {
        let registry = CapabilityRegistry::new(Policy::default());
        registry.register(&calculator()).unwrap();
        let before = registry.fingerprint();

        let bad_sink = Capability::new("BadSink")
            .functional()
            .method(MethodSpec::new("a"))
            .method(MethodSpec::new("b"));
        let outer = Capability::new("Outer").method(MethodSpec::new("attach").local("sink", &bad_sink));
        let err = tokio_test::assert_err!(registry.register(&outer));
        assert!(matches!(err, RmiError::Config(msg) if msg.contains("BadSink")));

        assert!(registry.capability("Outer").is_none());
        assert_eq!(registry.capabilities(), vec!["Calculator"]);
        assert_eq!(registry.method_count(), 2);
        assert_eq!(registry.fingerprint(), before);

        // Once the reference is fixed the same name registers cleanly.
        let sink = Capability::new("Sink").functional().method(MethodSpec::new("a"));
        let outer = Capability::new("Outer").method(MethodSpec::new("attach").local("sink", &sink));
        let info = tokio_test::assert_ok!(registry.register(&outer));
        assert_eq!(info.method("attach").unwrap().id, MethodId(2));
        assert_eq!(registry.capabilities(), vec!["Calculator", "Outer", "Sink"]);
    }

    #[test]
    fn test_policy_layers() {
        let global = Policy {
            response_timeout_ms: 1000,
            ..Policy::default()
        };
        let cap = Capability::new("Tuned")
            .policy(PolicyOverride::none().unreliable().response_timeout_ms(500))
            .method(MethodSpec::new("fast"))
            .method(
                MethodSpec::new("slow")
                    .policy(PolicyOverride::none().response_timeout_ms(9000).exceptions(ExceptionTransmission::Whole)),
            );
        let registry = CapabilityRegistry::new(global);
        let info = registry.register(&cap).unwrap();

        let fast = &info.method("fast").unwrap().policy;
        assert_eq!(fast.response_timeout_ms, 500);
        assert_eq!(fast.transport, TransportKind::Unreliable);

        let slow = &info.method("slow").unwrap().policy;
        assert_eq!(slow.response_timeout_ms, 9000);
        assert_eq!(slow.transport, TransportKind::Unreliable);
        assert_eq!(slow.exception_transmission, ExceptionTransmission::Whole);
        assert_eq!(info.policy().response_timeout_ms, 500);
    }

    #[test]
    fn test_fingerprint_tracks_order() {
        let a = CapabilityRegistry::new(Policy::default());
        a.register(&calculator()).unwrap();
        a.register(&consumer()).unwrap();

        let b = CapabilityRegistry::new(Policy::default());
        b.register(&calculator()).unwrap();
        b.register(&consumer()).unwrap();

        let c = CapabilityRegistry::new(Policy::default());
        c.register(&consumer()).unwrap();
        c.register(&calculator()).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_builtins_and_local_descriptions() {
        let registry = CapabilityRegistry::new(Policy::default());
        assert_eq!(registry.method(DESCRIBE_METHOD).unwrap().name, "describe");
        assert!(registry.method(IDENTITY_HASH_METHOD).unwrap().is_builtin());

        let local = registry.describe_local(&calculator()).unwrap();
        assert_eq!(local.method("add").unwrap().id, LOCAL_METHOD);
        assert_eq!(registry.method_count(), 0);
    }
}
