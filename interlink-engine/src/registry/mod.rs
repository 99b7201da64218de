//! Name → implementation registry for hosts and transforms.

pub mod class_registry;

pub use class_registry::{BuildContext, ClassRegistry, HostConstructor, Transform};
