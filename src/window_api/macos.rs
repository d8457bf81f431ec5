use anyhow::{anyhow, Result};
use objc2_app_kit::NSWorkspace;
use tracing::instrument;

use super::{ActiveWindowData, WindowManager};

/// Reports the frontmost application through `NSWorkspace`. Window titles need the screen
/// recording permission, so only the application name is reported.
#[derive(Default)]
pub struct MacWindowManager;

impl MacWindowManager {
    pub fn new() -> Self {
        Self
    }
}

impl WindowManager for MacWindowManager {
    #[instrument(skip(self))]
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        let workspace = unsafe { NSWorkspace::sharedWorkspace() };
        let application = unsafe { workspace.frontmostApplication() }
            .ok_or_else(|| anyhow!("No frontmost application"))?;
        let name = unsafe { application.localizedName() }
            .ok_or_else(|| anyhow!("Frontmost application has no name"))?;

        Ok(ActiveWindowData {
            window_title: "".into(),
            app_name: name.to_string().into(),
        })
    }

    fn get_idle_time(&mut self) -> Result<u32> {
        Err(anyhow!("Idle time is not available through NSWorkspace"))
    }
}
