use std::path::PathBuf;

pub const APP_NAME_DEFAULT: &str = "cloudsync";
pub const SERVER_NAME_SUFFIX: &str = "ShellExtensions";
pub const SOCKET_EXTENSION: &str = "sock";

/// Endpoint name for a hosting application. Both the server and the client
/// stub derive it from the same identity string, so no discovery is needed.
pub fn server_name_for_application(app_name: &str) -> String {
    let sanitized: String = app_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}-{SERVER_NAME_SUFFIX}")
}

pub fn server_name_default() -> String {
    server_name_for_application(APP_NAME_DEFAULT)
}

/// A server name containing `/` is already a socket path.
pub fn socket_path_for_server_name(server_name: &str) -> PathBuf {
    if server_name.contains('/') {
        return PathBuf::from(server_name);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("{server_name}.{SOCKET_EXTENSION}"))
}
