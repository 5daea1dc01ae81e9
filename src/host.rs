//! The operation table handed to an embedding host.
//!
//! A host looks operations up by name and calls them with no arguments. The
//! table mirrors what a scripting-language extension module registers:
//! `initialize_tls`, `atexit_handler`, and `force_cleanup`.
//!
//! With the `host-exports` feature, the operations and the table are also
//! exported as unmangled `extern "C"` symbols.

use core::fmt;

/// One named entry in a [`ModuleDef`].
#[derive(Debug, Copy, Clone)]
pub struct MethodDef {
    /// The name the host calls this operation by.
    pub name: &'static str,
    /// The operation itself.
    pub func: fn(),
    /// A one-line description.
    pub doc: &'static str,
}

/// A module's name and its table of operations.
#[derive(Debug)]
pub struct ModuleDef {
    /// The module name.
    pub name: &'static str,
    /// A one-line description.
    pub doc: &'static str,
    /// The operations, in registration order.
    pub methods: &'static [MethodDef],
}

/// A host asked for an operation the table doesn't have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module `{}` has no method `{}`", MODULE.name, self.0)
    }
}

impl std::error::Error for UnknownMethod {}

impl ModuleDef {
    /// Look up a method by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Call a method by name.
    pub fn call(&self, name: &str) -> Result<(), UnknownMethod> {
        let method = self
            .get(name)
            .ok_or_else(|| UnknownMethod(name.to_owned()))?;

        #[cfg(feature = "log")]
        log::trace!(target: "tls_at_exit::host", "Calling `{}.{}`", self.name, method.name);

        (method.func)();
        Ok(())
    }
}

static MODULE: ModuleDef = ModuleDef {
    name: "tls_at_exit",
    doc: "Thread-local destruction observed from exit callbacks",
    methods: &[
        MethodDef {
            name: "initialize_tls",
            func: crate::slot::initialize,
            doc: "Initialize TLS object",
        },
        MethodDef {
            name: "atexit_handler",
            func: crate::slot::probe,
            doc: "Atexit handler that accesses TLS",
        },
        MethodDef {
            name: "force_cleanup",
            func: crate::slot::force_release,
            doc: "Force cleanup of TLS",
        },
    ],
};

/// Return the module's operation table.
#[must_use]
pub fn module_init() -> &'static ModuleDef {
    #[cfg(feature = "log")]
    log::trace!(
        target: "tls_at_exit::host",
        "Registering module `{}` with {} methods",
        MODULE.name,
        MODULE.methods.len()
    );

    &MODULE
}

/// Unmangled `extern "C"` entry points for hosts linking this crate as a
/// `cdylib` or static library.
#[cfg(feature = "host-exports")]
#[cfg_attr(docsrs, doc(cfg(feature = "host-exports")))]
pub mod exports {
    use core::ffi::{CStr, c_char, c_int, c_void};

    /// C entry point for `initialize_tls`.
    #[unsafe(no_mangle)]
    pub extern "C" fn initialize_tls() {
        crate::slot::initialize()
    }

    /// C entry point for `atexit_handler`. Suitable for passing directly to
    /// `atexit`.
    #[unsafe(no_mangle)]
    pub extern "C" fn atexit_handler() {
        crate::slot::probe()
    }

    /// C entry point for `force_cleanup`.
    #[unsafe(no_mangle)]
    pub extern "C" fn force_cleanup() {
        crate::slot::force_release()
    }

    /// Return an opaque handle to the module table, for
    /// [`tls_at_exit_call`].
    #[unsafe(no_mangle)]
    pub extern "C" fn tls_at_exit_module_init() -> *const c_void {
        let module: *const super::ModuleDef = super::module_init();
        module.cast()
    }

    /// Call the method named `name` in the module behind `module`.
    ///
    /// Returns 0 on success and `ENOENT` if there is no such method or the
    /// name isn't UTF-8.
    ///
    /// # Safety
    ///
    /// `module` must come from [`tls_at_exit_module_init`] and `name` must
    /// point to a NUL-terminated string.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn tls_at_exit_call(module: *const c_void, name: *const c_char) -> c_int {
        let module = unsafe { &*module.cast::<super::ModuleDef>() };
        let name = unsafe { CStr::from_ptr(name) };

        match name.to_str().ok().map(|name| module.call(name)) {
            Some(Ok(())) => 0,
            _ => libc::ENOENT,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot;

    #[test]
    fn table_has_three_operations() {
        let module = module_init();
        assert_eq!(module.name, "tls_at_exit");
        let names: Vec<_> = module.methods.iter().map(|method| method.name).collect();
        assert_eq!(names, ["initialize_tls", "atexit_handler", "force_cleanup"]);
    }

    #[test]
    fn call_by_name() {
        let module = module_init();
        module.call("initialize_tls").unwrap();
        assert!(slot::is_live());
        module.call("atexit_handler").unwrap();
        module.call("force_cleanup").unwrap();
        assert!(!slot::is_live());
        module.call("force_cleanup").unwrap();
    }

    #[test]
    fn unknown_method() {
        let err = module_init().call("initialize").unwrap_err();
        assert_eq!(err, UnknownMethod("initialize".to_owned()));
        assert_eq!(
            err.to_string(),
            "module `tls_at_exit` has no method `initialize`"
        );
    }
}
