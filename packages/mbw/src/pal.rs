//! Platform Abstraction Layer (PAL). Every process-control call into the operating system goes
//! through the [`Bindings`] trait so the controller and worker logic can run against mocks.

mod abstractions;
pub(crate) use abstractions::*;

mod facade;
pub(crate) use facade::*;

mod real;
pub(crate) use real::*;
