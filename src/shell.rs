use std::path::PathBuf;

use async_trait::async_trait;

/// The editor front end, as seen by the workspace core.
///
/// Implemented by the editor integration; the core never depends on a
/// specific editor runtime.
#[async_trait]
pub trait Shell: Send + Sync {
    /// Folders currently open in the editor.
    fn workspace_folders(&self) -> Vec<PathBuf>;

    /// Surfaces an error to the user.
    fn show_error(&self, message: &str);

    /// Asks the user to choose one of `items`. Returns the chosen index, or
    /// `None` if the selection was dismissed.
    async fn quick_pick(&self, title: &str, items: &[String]) -> Option<usize>;
}
