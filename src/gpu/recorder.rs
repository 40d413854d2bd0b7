use std::collections::HashMap;

use super::{Driver, Layout, PassTarget, TextureId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassTargetId {
    Backbuffer,
    Texture(TextureId),
}

/// Tracks the open render pass and every texture's current layout so the
/// context only records the passes and barriers that are actually needed.
#[derive(Default)]
pub(crate) struct Recorder {
    active: Option<PassTargetId>,
    layouts: HashMap<TextureId, Layout>,
    pub render_passes: u64,
    pub transitions: u64,
}

impl Recorder {
    pub fn active(&self) -> Option<PassTargetId> {
        self.active
    }

    pub fn layout(&self, texture: TextureId) -> Layout {
        self.layouts.get(&texture).copied().unwrap_or_default()
    }

    /// Records a layout change performed by the driver itself.
    pub fn set_layout(&mut self, texture: TextureId, layout: Layout) {
        self.layouts.insert(texture, layout);
    }

    pub fn forget(&mut self, texture: TextureId) {
        self.layouts.remove(&texture);
    }

    pub fn begin_pass<D: Driver>(
        &mut self,
        driver: &mut D,
        cmd: &mut D::CommandList,
        id: PassTargetId,
        target: PassTarget<'_, D>,
    ) {
        assert!(self.active.is_none(), "render pass begun while another is active");
        driver.cmd_begin_pass(cmd, target);
        self.active = Some(id);
        self.render_passes += 1;
    }

    pub fn end_pass<D: Driver>(&mut self, driver: &mut D, cmd: &mut D::CommandList) {
        if self.active.take().is_some() {
            driver.cmd_end_pass(cmd);
        }
    }

    /// Moves `texture` into `to`, closing the open pass first since barriers
    /// cannot be recorded inside one.
    pub fn transition<D: Driver>(
        &mut self,
        driver: &mut D,
        cmd: &mut D::CommandList,
        id: TextureId,
        texture: &D::Texture,
        to: Layout,
    ) {
        let from = self.layout(id);
        if from == to {
            return;
        }
        self.end_pass(driver, cmd);
        driver.cmd_transition(cmd, texture, from, to);
        self.layouts.insert(id, to);
        self.transitions += 1;
    }

    /// A new command list starts outside any pass.
    pub fn reset(&mut self) {
        self.active = None;
    }
}
