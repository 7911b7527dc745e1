use serde::Deserialize;

/// `ErrorCode` value the platform uses for success.
pub const PLATFORM_SUCCESS: i32 = 1;

/// Wrapper around every Bungie.net platform payload.
///
/// `Response` is absent on most failures, so it stays optional here and the
/// client decides what a missing payload means.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BungieResponse<T> {
    pub response: Option<T>,
    pub error_code: i32,
    #[serde(default)]
    pub error_status: String,
    #[serde(default)]
    pub message: String,
}

impl<T> BungieResponse<T> {
    pub fn is_success(&self) -> bool {
        self.error_code == PLATFORM_SUCCESS
    }
}
