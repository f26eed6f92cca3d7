use log::trace;

use super::super::page::{Document, FrameAccessError, FrameRef, VideoElement};
use super::{HostContext, VideoProbe, VideoSourceHandle};

/// Result of one local walk: the first usable video, plus the frames that refused access.
#[derive(Debug, Default)]
pub(crate) struct LocalScan {
    pub(crate) handle: Option<VideoSourceHandle>,
    pub(crate) cross_origin_frames: Vec<FrameRef>,
}

/// Searches the page and its same-origin frames with an ordered list of locators.
#[derive(Debug, Clone)]
pub(crate) struct LocalProbe {
    locators: Vec<String>,
    max_depth: usize,
}

impl LocalProbe {
    pub(crate) fn new(locators: Vec<String>, max_depth: usize) -> Self {
        Self {
            locators,
            max_depth,
        }
    }

    pub(crate) fn find(&self, document: &dyn Document, max_depth: usize) -> Option<VideoSourceHandle> {
        self.scan(document, max_depth).handle
    }

    /// Walks the root document first, then same-origin frames breadth-first up to `max_depth`
    /// levels below it. Cross-origin frames are recorded, never an error.
    pub(crate) fn scan(&self, document: &dyn Document, max_depth: usize) -> LocalScan {
        let mut scan = LocalScan::default();
        let mut level: Vec<(&dyn Document, String)> = vec![(document, String::new())];

        for depth in 0..=max_depth {
            let mut next_level = Vec::new();
            for (doc, path) in std::mem::take(&mut level) {
                if let Some(element) = self.first_usable(doc) {
                    trace!("local video found at depth {depth} (frame path `{path}`)");
                    scan.handle = Some(VideoSourceHandle::from_local_element(&element));
                    return scan;
                }
                if depth == max_depth {
                    continue;
                }
                for frame in doc.frames() {
                    match doc.frame_document(&frame) {
                        Ok(child) => next_level.push((child, format!("{path}/{frame}"))),
                        Err(FrameAccessError::AccessDenied(frame)) => {
                            scan.cross_origin_frames.push(frame);
                        }
                        Err(FrameAccessError::Detached(_)) => {}
                    }
                }
            }
            if next_level.is_empty() {
                break;
            }
            level = next_level;
        }
        scan
    }

    fn first_usable(&self, document: &dyn Document) -> Option<VideoElement> {
        self.locators
            .iter()
            .flat_map(|locator| document.videos(locator))
            .find(carries_real_data)
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.max_depth
    }
}

impl VideoProbe for LocalProbe {
    fn probe(&mut self, ctx: &mut HostContext<'_>) -> Option<VideoSourceHandle> {
        self.find(ctx.page.document(), self.max_depth)
    }
}

fn carries_real_data(element: &VideoElement) -> bool {
    element.known_duration().is_some() || element.has_source()
}
