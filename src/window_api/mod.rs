//! Contains logic for querying the foreground window in different environments.
//! [GenericWindowManager] is the main artifact of this module, it picks the platform
//! implementation at startup. Everything above this module only sees [WindowProbe] and
//! [WindowManager].

#[cfg(all(feature = "macos", target_os = "macos"))]
pub mod macos;
#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindowData {
    /// Name of the window. For example 'bash in hello' or 'Document 1' or 'Vibing in YouTube -
    /// Chrome'
    pub window_title: Arc<str>,
    /// Raw application identifier as reported by the platform. Usually a full path to an
    /// executable, e.g. /usr/bin/nvim or C:\Program Files\..\chrome.exe
    pub app_name: Arc<str>,
}

/// Intended to serve as a contract windows, linux and macos systems must implement.
#[cfg_attr(test, mockall::automock)]
pub trait WindowManager: Send {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData>;

    /// Retrieve amount of time user has been inactive in milliseconds
    fn get_idle_time(&mut self) -> Result<u32>;
}

/// Single query of the foreground application. Platform failures are reported as [None], the
/// caller treats them as a skipped tick.
pub trait WindowProbe: Send {
    fn poll(&mut self) -> Option<ActiveWindowData>;
}

impl<W: WindowManager> WindowProbe for W {
    fn poll(&mut self) -> Option<ActiveWindowData> {
        self.get_active_window_data()
            .inspect_err(|e| debug!("Foreground window is unavailable {e:?}"))
            .ok()
    }
}

/// Serves as a cross-compatible WindowManager implementation.
pub struct GenericWindowManager {
    inner: Box<dyn WindowManager>,
}

impl GenericWindowManager {
    /// Selects the implementation compiled in through features. When nothing is available, or
    /// the platform connection fails, the returned manager never reports a window.
    pub fn new() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                Self {
                    inner: Box::new(win::WindowsWindowManager::new()),
                }
            }
            else if #[cfg(feature = "x11")] {
                match x11::LinuxWindowManager::new() {
                    Ok(manager) => Self { inner: Box::new(manager) },
                    Err(e) => {
                        tracing::error!("Failed to connect to the X server {e:?}");
                        Self::unsupported()
                    }
                }
            }
            else if #[cfg(all(feature = "macos", target_os = "macos"))] {
                Self {
                    inner: Box::new(macos::MacWindowManager::new()),
                }
            }
            else {
                tracing::warn!("No window manager was compiled in, foreground tracking is disabled");
                Self::unsupported()
            }
        }
    }

    fn unsupported() -> Self {
        Self {
            inner: Box::new(UnsupportedWindowManager),
        }
    }
}

impl Default for GenericWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowManager for GenericWindowManager {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        self.inner.get_active_window_data()
    }

    fn get_idle_time(&mut self) -> Result<u32> {
        self.inner.get_idle_time()
    }
}

/// Used on platforms without an implementation. Probing always fails, which makes idle
/// detection degrade and the tracker skip every tick.
pub struct UnsupportedWindowManager;

impl WindowManager for UnsupportedWindowManager {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        Err(anyhow!(
            "Window probing is not supported on {}",
            std::env::consts::OS
        ))
    }

    fn get_idle_time(&mut self) -> Result<u32> {
        Err(anyhow!(
            "Idle time is not supported on {}",
            std::env::consts::OS
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{ActiveWindowData, MockWindowManager, UnsupportedWindowManager, WindowProbe};
    use anyhow::anyhow;

    #[test]
    fn test_probe_maps_errors_to_none() {
        let mut manager = MockWindowManager::new();
        let mut results = vec![
            Err(anyhow!("transient")),
            Ok(ActiveWindowData {
                window_title: "main.rs".into(),
                app_name: "/usr/bin/code".into(),
            }),
        ]
        .into_iter();
        manager
            .expect_get_active_window_data()
            .times(2)
            .returning(move || results.next().unwrap());

        assert_eq!(manager.poll(), None);
        assert_eq!(
            manager.poll().map(|v| v.app_name),
            Some("/usr/bin/code".into())
        );
    }

    #[test]
    fn test_unsupported_probe_is_silent() {
        let mut manager = UnsupportedWindowManager;
        assert_eq!(manager.poll(), None);
        assert_eq!(manager.poll(), None);
    }
}
