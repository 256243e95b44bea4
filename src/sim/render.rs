//! Draw list produced by the render pass

use glam::Mat4;

use crate::sim::entity::EntityId;
use crate::sim::frame::FrameContext;

/// One entity to draw: which model, where
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub id: EntityId,
    pub model: u32,
    pub transform: Mat4,
}

/// Everything rendered for one frame
#[derive(Debug, Clone, Default)]
pub struct RenderList {
    frame: FrameContext,
    commands: Vec<DrawCommand>,
}

impl RenderList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frame: FrameContext::default(),
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Empty the list for reuse, keeping its allocation
    pub fn reset(&mut self, frame: FrameContext) {
        self.frame = frame;
        self.commands.clear();
    }

    #[inline]
    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    #[inline]
    pub fn frame(&self) -> &FrameContext {
        &self.frame
    }

    #[inline]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Consumer of finished draw lists (GPU backend, recorder, network mirror)
///
/// In overlapped mode `present` runs on the render thread while the next
/// frame is being simulated.
pub trait Renderer: Send {
    fn present(&mut self, list: &RenderList);
}
