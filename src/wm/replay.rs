//! Recording the event stream of a session, and replaying it.
//!
//! A recording is a RON file: a header line with the root window and the
//! settings, then one line per event or reply. Request tokens are handed out
//! sequentially, so replaying the lines against a fresh [`Wm`] reproduces the
//! recorded session as long as the host called [`Wm::import_root`] right after
//! attaching the recorder.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
#[cfg(test)]
use tempfile::NamedTempFile;
use tracing::warn;

use super::Wm;
use super::request::{CallbackTransport, Request, RequestToken};
use crate::common::config::TreeSettings;
use crate::model::WindowId;

/// Everything that can drive a [`Wm`] from the outside.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Created {
        window: WindowId,
        parent: WindowId,
    },
    Destroyed {
        window: WindowId,
    },
    Reparented {
        window: WindowId,
        old_parent: WindowId,
        new_parent: WindowId,
    },
    RestackedAbove {
        window: WindowId,
        sibling: Option<WindowId>,
    },
    PropertyChanged {
        window: WindowId,
        wm_state: bool,
    },
    Subscribed {
        token: RequestToken,
        ok: bool,
    },
    Children {
        token: RequestToken,
        children: Option<Vec<WindowId>>,
    },
    WmState {
        token: RequestToken,
        value: Option<bool>,
    },
}

#[derive(Serialize, Deserialize)]
struct Header {
    root: WindowId,
    settings: TreeSettings,
}

#[derive(Default)]
pub struct Record {
    file: Option<File>,
    #[cfg(test)]
    temp: Option<NamedTempFile>,
}

impl Record {
    pub fn new(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => Some(
                File::create(path).with_context(|| format!("creating recording {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self { file, ..Default::default() })
    }

    #[cfg(test)]
    pub fn new_for_test(temp: NamedTempFile) -> Self { Self { file: None, temp: Some(temp) } }

    fn file(&mut self) -> Option<&mut File> {
        #[cfg(test)]
        return self.file.as_mut().or(self.temp.as_mut().map(|temp| temp.as_file_mut()));
        #[cfg(not(test))]
        self.file.as_mut()
    }

    pub(super) fn start(&mut self, root: WindowId, settings: &TreeSettings) {
        let header = Header { root, settings: settings.clone() };
        self.write_line(&header);
    }

    pub(super) fn on_event(&mut self, event: &InboundEvent) { self.write_line(event); }

    fn write_line(&mut self, value: &impl Serialize) {
        let Some(file) = self.file() else { return };
        let result = ron::ser::to_string(value)
            .map_err(anyhow::Error::from)
            .and_then(|line| Ok(writeln!(file, "{line}")?));
        if let Err(e) = result {
            warn!("failed to record event: {e}");
        }
    }
}

/// Replays a recording, handing every request the session makes to
/// `on_request`.
pub fn replay(path: &Path, on_request: impl FnMut(Request)) -> anyhow::Result<Wm> {
    let file = BufReader::new(
        File::open(path).with_context(|| format!("opening recording {}", path.display()))?,
    );
    let mut lines = file.lines();
    let header: Header = ron::de::from_str(&lines.next().context("empty recording")??)?;
    let mut wm = Wm::new(header.root, header.settings);
    let mut conn = CallbackTransport(on_request);
    wm.import_root(&mut conn);
    for (index, line) in lines.enumerate() {
        let event: InboundEvent = ron::de::from_str(&line?)?;
        wm.handle_event(&mut conn, event)
            .with_context(|| format!("replaying event {}", index + 1))?;
    }
    Ok(wm)
}
