//! Function objects: closures and class member templates.
//!
//! Both kinds point at a shared [`Method`](crate::runtime::Method) and carry a binding: the
//! module record they execute in plus call-site profiling data collected against the code
//! they ran so far. [`FunctionObject::rebind`] is how the relinker moves a function to a new
//! execution context after its method was spliced.

use std::sync::{Arc, RwLock};

use crate::runtime::{method::MethodRc, record::ModuleRecordRc};

/// Call-site feedback gathered while a function runs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileTypeInfo {
    /// Hit count per call site
    pub call_sites: Vec<u32>,
}

/// The mutable part of a function object
#[derive(Clone, Debug, Default)]
pub struct FunctionBinding {
    /// Record the function executes in
    pub module: Option<ModuleRecordRc>,
    /// Collected feedback, if any
    pub profile: Option<ProfileTypeInfo>,
}

/// Shared behaviour of closures and function templates
pub trait FunctionObject {
    /// The method this function executes
    fn method(&self) -> &MethodRc;

    /// The binding of this function
    fn binding(&self) -> &RwLock<FunctionBinding>;

    /// Record the function executes in
    fn module(&self) -> Option<ModuleRecordRc> {
        read_lock!(self.binding()).module.clone()
    }

    /// Collected feedback, if any
    fn profile(&self) -> Option<ProfileTypeInfo> {
        read_lock!(self.binding()).profile.clone()
    }

    /// Counts one execution of call site `site`
    fn record_call(&self, site: usize) {
        let mut binding = write_lock!(self.binding());
        let profile = binding.profile.get_or_insert_with(ProfileTypeInfo::default);
        if profile.call_sites.len() <= site {
            profile.call_sites.resize(site + 1, 0);
        }
        profile.call_sites[site] = profile.call_sites[site].saturating_add(1);
    }

    /// Binds the function to `module` and discards feedback gathered against the old code
    fn rebind(&self, module: ModuleRecordRc) {
        let mut binding = write_lock!(self.binding());
        binding.module = Some(module);
        binding.profile = None;
    }
}

/// An executable closure
#[derive(Debug)]
pub struct Closure {
    method: MethodRc,
    binding: RwLock<FunctionBinding>,
}

/// A reference to a `Closure`
pub type ClosureRc = Arc<Closure>;

impl Closure {
    /// Creates a closure over `method` executing in `module`
    #[must_use]
    pub fn new(method: MethodRc, module: Option<ModuleRecordRc>) -> Self {
        Closure {
            method,
            binding: RwLock::new(FunctionBinding {
                module,
                profile: None,
            }),
        }
    }
}

impl FunctionObject for Closure {
    fn method(&self) -> &MethodRc {
        &self.method
    }

    fn binding(&self) -> &RwLock<FunctionBinding> {
        &self.binding
    }
}

/// A class member template, instantiated into a closure when the class is defined
#[derive(Debug)]
pub struct FunctionTemplate {
    method: MethodRc,
    binding: RwLock<FunctionBinding>,
}

/// A reference to a `FunctionTemplate`
pub type FunctionTemplateRc = Arc<FunctionTemplate>;

impl FunctionTemplate {
    /// Creates a template over `method` executing in `module`
    #[must_use]
    pub fn new(method: MethodRc, module: Option<ModuleRecordRc>) -> Self {
        FunctionTemplate {
            method,
            binding: RwLock::new(FunctionBinding {
                module,
                profile: None,
            }),
        }
    }
}

impl FunctionObject for FunctionTemplate {
    fn method(&self) -> &MethodRc {
        &self.method
    }

    fn binding(&self) -> &RwLock<FunctionBinding> {
        &self.binding
    }
}
