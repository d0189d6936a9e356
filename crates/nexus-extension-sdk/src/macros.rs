//! Declarative macros for native packages.

/// Export the entry points of a native extension package.
///
/// Each listed type must implement [`crate::DataSource`] and [`Default`].
/// The host instantiates them by id through `nexus_data_source_create`.
///
/// # Example
///
/// ```rust,ignore
/// use nexus_extension_sdk::export_data_sources;
///
/// export_data_sources! {
///     CsvSource => ("acme.csv", "CSV files", "Reads CSV files from a folder"),
///     NullSource => ("acme.null", "Null", ""),
/// }
/// ```
#[macro_export]
macro_rules! export_data_sources {
    (
        $(
            $ty:ty => ($id:expr, $name:expr, $description:expr)
        ),+ $(,)?
    ) => {
        #[no_mangle]
        pub extern "C" fn nexus_extension_abi_version() -> u32 {
            $crate::NATIVE_ABI_VERSION
        }

        #[no_mangle]
        pub extern "C" fn nexus_extension_descriptors() -> *const ::std::os::raw::c_char {
            static DESCRIPTORS: ::std::sync::OnceLock<::std::ffi::CString> = ::std::sync::OnceLock::new();

            DESCRIPTORS
                .get_or_init(|| {
                    let descriptors = vec![
                        $( $crate::ExtensionDescriptor::new($id, $name, $description) ),+
                    ];
                    let json = $crate::__serde_json::to_string(&descriptors)
                        .unwrap_or_else(|_| "[]".to_string());
                    ::std::ffi::CString::new(json).unwrap_or_default()
                })
                .as_ptr()
        }

        /// # Safety
        ///
        /// `id` must be null or point to a NUL-terminated string.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn nexus_data_source_create(
            id: *const ::std::os::raw::c_char,
        ) -> *mut $crate::DataSourceBox {
            if id.is_null() {
                return ::std::ptr::null_mut();
            }
            let id = ::std::ffi::CStr::from_ptr(id).to_string_lossy();

            $(
                if id == $id {
                    let source: $crate::DataSourceBox = Box::new(<$ty as ::std::default::Default>::default());
                    return Box::into_raw(Box::new(source));
                }
            )+

            ::std::ptr::null_mut()
        }
    };
}
