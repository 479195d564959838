use std::{
    ffi::{c_void, CStr},
    sync::atomic::{AtomicUsize, Ordering},
};

use vulkanalia::prelude::v1_0::*;
use log::*;

/// Receiver for validation layer messages.
///
/// The sink is boxed by its owner and handed to the debug
/// messenger as user data, so its address must stay stable
/// until the messenger is destroyed. Messages below WARNING are
/// only forwarded at debug/trace level; the sink never affects
/// control flow.
#[derive(Default)]
pub struct DebugSink {
    warnings: AtomicUsize,
    errors: AtomicUsize,
}

impl DebugSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs a message and returns whether it was surfaced.
    pub fn report(
        &self,
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        type_: vk::DebugUtilsMessageTypeFlagsEXT,
        message: &str,
    ) -> bool {
        if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
            self.errors.fetch_add(1, Ordering::Relaxed);
            error!("({type_:?}) {message}");
            true
        } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
            self.warnings.fetch_add(1, Ordering::Relaxed);
            warn!("({type_:?}) {message}");
            true
        } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
            debug!("({type_:?}) {message}");
            false
        } else {
            trace!("({type_:?}) {message}");
            false
        }
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub(crate) fn as_user_data(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }
}

pub(crate) extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    // The messenger hands back the pointer registered at
    // creation time; without it there is nowhere to route the
    // message.
    if data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }

    let data = unsafe { *data };
    let message = if data.message.is_null() {
        "".into()
    } else {
        unsafe { CStr::from_ptr(data.message) }.to_string_lossy()
    };

    let sink = unsafe { &*(user_data as *const DebugSink) };
    sink.report(severity, type_, &message);

    // Returning true would abort the call that triggered the
    // message with VALIDATION_FAILED.
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_and_errors_are_surfaced() {
        let sink = DebugSink::new();
        let validation = vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;

        assert!(sink.report(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR, validation, "bad"));
        assert!(sink.report(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING, validation, "meh"));
        assert_eq!(sink.errors(), 1);
        assert_eq!(sink.warnings(), 1);
    }

    #[test]
    fn verbose_and_info_are_suppressed() {
        let sink = DebugSink::new();
        let general = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL;

        assert!(!sink.report(vk::DebugUtilsMessageSeverityFlagsEXT::INFO, general, "loaded"));
        assert!(!sink.report(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE, general, "chatty"));
        assert_eq!(sink.errors() + sink.warnings(), 0);
    }

    #[test]
    fn callback_routes_through_user_data() {
        let sink = DebugSink::new();
        let text = b"routed\0";
        let mut data = vk::DebugUtilsMessengerCallbackDataEXT::default();
        data.message = text.as_ptr() as *const _;

        let result = debug_callback(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            &data,
            sink.as_user_data(),
        );

        assert_eq!(result, vk::FALSE);
        assert_eq!(sink.warnings(), 1);
    }

    #[test]
    fn callback_without_sink_is_ignored() {
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default();
        let result = debug_callback(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            &data,
            std::ptr::null_mut(),
        );
        assert_eq!(result, vk::FALSE);
    }
}
