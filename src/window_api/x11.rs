use anyhow::{anyhow, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::instrument;
use xcb::{
    screensaver::{QueryInfo, QueryInfoReply},
    x::{self, Atom, Drawable, GetProperty, GrabServer, InternAtom, UngrabServer, Window, ATOM_ANY},
    Connection,
};

use super::{ActiveWindowData, WindowManager};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_pid(conn: &Connection, window: Window, pid_atom: Atom) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: pid_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<u32>().first().copied())
}

fn get_active_window(conn: &Connection, root: Window, active_window_atom: Atom) -> Result<Window> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    result
        .value::<Window>()
        .first()
        .copied()
        .ok_or_else(|| anyhow!("No window is focused"))
}

fn get_name(conn: &Connection, window: Window, wm_name_atom: Atom) -> Result<String> {
    let wm_name = conn.wait_for_reply(conn.send_request(&x::GetProperty {
        delete: false,
        window,
        property: wm_name_atom,
        r#type: x::ATOM_ANY,
        long_offset: 0,
        long_length: 1024,
    }))?;
    Ok(String::from_utf8_lossy(wm_name.value::<u8>()).into_owned())
}

/// Falls back to the process name when the executable path can't be read (e.g. other users'
/// processes).
fn get_process_name(system: &mut System, pid: u32) -> Option<String> {
    let pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_exe(sysinfo::UpdateKind::OnlyIfNotSet),
    );
    let process = system.process(pid)?;
    process
        .exe()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string())
        .or_else(|| process.name().to_str().map(|v| v.to_string()))
}

pub struct LinuxWindowManager {
    connection: Connection,
    root: Window,
    active_window_atom: Atom,
    window_name_atom: Atom,
    pid_atom: Atom,
    system: System,
}

impl LinuxWindowManager {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;

        // Currently the application only supports 1 x11 screen.
        let root = connection
            .get_setup()
            .roots()
            .nth(usize::try_from(preferred_screen).unwrap_or(0))
            .map(|screen| screen.root())
            .ok_or_else(|| anyhow!("X server reported no screens"))?;

        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let window_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            root,
            active_window_atom,
            window_name_atom,
            pid_atom,
            system: System::new(),
        })
    }

    #[instrument(skip(self))]
    fn get_active_inner(&mut self) -> Result<ActiveWindowData> {
        let active_window = get_active_window(&self.connection, self.root, self.active_window_atom)?;
        let window_name = get_name(&self.connection, active_window, self.window_name_atom)?;
        let pid = get_pid(&self.connection, active_window, self.pid_atom)?
            .ok_or_else(|| anyhow!("Focused window has no _NET_WM_PID"))?;
        let app_name = get_process_name(&mut self.system, pid)
            .ok_or_else(|| anyhow!("Process {pid} disappeared"))?;
        Ok(ActiveWindowData {
            window_title: window_name.into(),
            app_name: app_name.into(),
        })
    }
}

impl WindowManager for LinuxWindowManager {
    #[instrument(skip(self))]
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        let _ = self.connection.send_request(&GrabServer {});
        let result = self.get_active_inner();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }

    #[instrument(skip(self))]
    fn get_idle_time(&mut self) -> Result<u32> {
        let idle = self.connection.send_request(&QueryInfo {
            drawable: Drawable::Window(self.root),
        });
        let reply: QueryInfoReply = self.connection.wait_for_reply(idle)?;
        Ok(reply.ms_since_user_input())
    }
}
