//! Capability declarations.
//!
//! A [`Capability`] is a named contract: its methods, the parents it
//! extends, and policy overrides. Declarations are plain data; the
//! [`CapabilityRegistry`](crate::registry::CapabilityRegistry) validates
//! and flattens them into dispatchable method tables.

use crate::value::ValueType;
use parley_types::PolicyOverride;

/// How an object-typed parameter or result crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMarker {
    /// Not an object reference.
    None,
    /// Passed by reference; any capability.
    Local,
    /// Passed by reference; the capability must be functional.
    Closure,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ValueType,
    pub marker: RefMarker,
    pub(crate) referenced: Option<Box<Capability>>,
}

#[derive(Debug, Clone)]
pub struct ResultSpec {
    pub ty: ValueType,
    pub marker: RefMarker,
    pub(crate) referenced: Option<Box<Capability>>,
}

impl Default for ResultSpec {
    fn default() -> Self {
        Self {
            ty: ValueType::Unit,
            marker: RefMarker::None,
            referenced: None,
        }
    }
}

/// One declared method.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub result: ResultSpec,
    pub policy: PolicyOverride,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            result: ResultSpec::default(),
            policy: PolicyOverride::none(),
        }
    }

    /// A by-value parameter.
    pub fn param(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            marker: RefMarker::None,
            referenced: None,
        });
        self
    }

    /// A parameter passed by reference; the callee sees a proxy.
    pub fn local(mut self, name: impl Into<String>, capability: &Capability) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty: ValueType::object(capability.name()),
            marker: RefMarker::Local,
            referenced: Some(Box::new(capability.clone())),
        });
        self
    }

    /// A functional parameter passed by reference.
    pub fn closure(mut self, name: impl Into<String>, capability: &Capability) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty: ValueType::object(capability.name()),
            marker: RefMarker::Closure,
            referenced: Some(Box::new(capability.clone())),
        });
        self
    }

    pub fn returns(mut self, ty: ValueType) -> Self {
        self.result = ResultSpec {
            ty,
            marker: RefMarker::None,
            referenced: None,
        };
        self
    }

    /// Return an object by reference.
    pub fn returns_remote(mut self, capability: &Capability) -> Self {
        self.result = ResultSpec {
            ty: ValueType::object(capability.name()),
            marker: RefMarker::Local,
            referenced: Some(Box::new(capability.clone())),
        };
        self
    }

    /// Return a functional object by reference.
    pub fn returns_closure(mut self, capability: &Capability) -> Self {
        self.result = ResultSpec {
            ty: ValueType::object(capability.name()),
            marker: RefMarker::Closure,
            referenced: Some(Box::new(capability.clone())),
        };
        self
    }

    pub fn policy(mut self, policy: PolicyOverride) -> Self {
        self.policy = policy;
        self
    }

    /// Never forwarded: the method gets no id and proxies refuse it.
    pub fn local_only(mut self) -> Self {
        self.policy.call_local_only = Some(true);
        self
    }
}

/// A named contract of remotely callable methods.
#[derive(Debug, Clone)]
pub struct Capability {
    name: String,
    functional: bool,
    methods: Vec<MethodSpec>,
    parents: Vec<Capability>,
    policy: PolicyOverride,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functional: false,
            methods: Vec::new(),
            parents: Vec::new(),
            policy: PolicyOverride::none(),
        }
    }

    /// Mark as a single-method capability usable as a closure.
    pub fn functional(mut self) -> Self {
        self.functional = true;
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    pub fn extends(mut self, parent: &Capability) -> Self {
        self.parents.push(parent.clone());
        self
    }

    /// Capability-level policy, applied to every method it declares.
    pub fn policy(mut self, policy: PolicyOverride) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }

    pub fn parents(&self) -> &[Capability] {
        &self.parents
    }

    pub fn policy_override(&self) -> &PolicyOverride {
        &self.policy
    }

    /// Capabilities named by callback-style params and remote results.
    pub(crate) fn referenced(&self) -> Vec<&Capability> {
        let mut out = Vec::new();
        for method in &self.methods {
            for param in &method.params {
                if let Some(cap) = &param.referenced {
                    out.push(cap.as_ref());
                }
            }
            if let Some(cap) = &method.result.referenced {
                out.push(cap.as_ref());
            }
        }
        for parent in &self.parents {
            out.extend(parent.referenced());
        }
        out
    }
}
