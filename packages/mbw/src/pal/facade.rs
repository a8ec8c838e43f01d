#![cfg_attr(coverage_nightly, coverage(off))]

use std::fmt::Debug;
use std::io;
#[cfg(test)]
use std::sync::Arc;

use crate::ProcessorIndex;
#[cfg(test)]
use crate::pal::MockBindings;
use crate::pal::{Bindings, BuildTargetBindings, Forked, Pid};

/// Enum to hide the real/mock choice behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Target(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetBindings)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Bindings for BindingsFacade {
    fn fork(&self) -> Result<Forked, io::Error> {
        match self {
            Self::Target(bindings) => bindings.fork(),
            #[cfg(test)]
            Self::Mock(mock) => mock.fork(),
        }
    }

    fn pin_current_process(&self, processor: ProcessorIndex) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.pin_current_process(processor),
            #[cfg(test)]
            Self::Mock(mock) => mock.pin_current_process(processor),
        }
    }

    fn wait_for_child(&self, pid: Pid) -> Result<i32, io::Error> {
        match self {
            Self::Target(bindings) => bindings.wait_for_child(pid),
            #[cfg(test)]
            Self::Mock(mock) => mock.wait_for_child(pid),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
