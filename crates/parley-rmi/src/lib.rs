//! Remote method invocation over Parley connections.
//!
//! An [`InvocationSpace`] hosts local objects under numeric ids and hands
//! out [`Proxy`] handles for objects hosted by peers. Both sides register
//! the same [`Capability`] declarations in the same order, which gives
//! every method the same id on both ends. Calls are MessagePack frames
//! carried by any [`parley_wire::Connection`].
//!
//! ```no_run
//! use parley_rmi::{Capability, InvocationSpace, MethodSpec, Service, Value, ValueType};
//! use parley_types::SpaceConfig;
//!
//! # async fn demo() -> Result<(), parley_rmi::RmiError> {
//! let space = InvocationSpace::new(SpaceConfig::default());
//! space.register(
//!     &Capability::new("Adder").method(
//!         MethodSpec::new("add")
//!             .param("a", ValueType::Int)
//!             .param("b", ValueType::Int)
//!             .returns(ValueType::Int),
//!     ),
//! )?;
//! let adder = Service::new("Adder", ()).on_sync("add", |_, call| {
//!     Ok(Value::from(call.i64(0)? + call.i64(1)?))
//! });
//! space.host(adder.into_ref());
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod message;
pub mod object_table;
pub mod proxy;
pub mod registry;
pub mod remotable;
pub mod resolver;
pub mod space;
pub mod transaction;
pub mod value;

mod dispatcher;
mod worker;

pub use capability::{Capability, MethodSpec};
pub use config::load_config;
pub use error::{RemoteFailure, RmiError, RmiResult};
pub use proxy::Proxy;
pub use registry::{CapabilityInfo, CapabilityRegistry, RemoteMethod};
pub use remotable::{Binding, Call, Callback, Closure, Remotable, Service};
pub use space::InvocationSpace;
pub use value::{same_object, ObjectRef, Value, ValueType};
