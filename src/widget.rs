//! iced integration: a shader widget that drives one [`Screen`].
//!
//! The widget owns no scene state. Messages from the host are applied to the
//! shared [`Screen`] directly; the widget turns window events into frame
//! callbacks, throttled resizes and hover picks, and hands the screen to the
//! GPU side through its primitive.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use glam::Vec2;
use iced::{
    Element, Length, Rectangle, Size, mouse,
    wgpu::TextureFormat,
    widget::{
        self,
        shader::{self, Pipeline, Viewport},
    },
    window,
};
use log::debug;

use crate::picking::{PickQuery, PickResult};
use crate::render_loop::FrameAction;
use crate::renderer::{RenderParams, SceneRenderer};
use crate::screen::Screen;
use crate::throttle::{Clock, SystemClock, Throttle};

/// Messages published by [`ScreenView`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenMessage {
    /// Answer to a hover or click pick.
    Picked(PickResult),
    /// The render loop stopped; the screen has been disposed.
    Disposed,
}

pub type SharedScreen = Arc<Mutex<Screen>>;

/// A [`Screen`] drawn as an iced shader widget.
#[derive(Clone)]
pub struct ScreenView {
    screen: SharedScreen,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ScreenView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScreenView").finish_non_exhaustive()
    }
}

impl ScreenView {
    pub fn new(screen: SharedScreen) -> Self {
        Self::with_clock(screen, Arc::new(SystemClock::default()))
    }

    pub fn with_clock(screen: SharedScreen, clock: Arc<dyn Clock>) -> Self {
        Self { screen, clock }
    }

    pub fn screen(&self) -> &SharedScreen {
        &self.screen
    }

    pub fn view(&self) -> Element<'_, ScreenMessage> {
        widget::shader(self)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }
}

/// Per-widget event state. Throttles are created on first use since their
/// windows come from the screen's config.
#[derive(Debug, Default)]
pub struct ViewState {
    size: Option<Size>,
    resize: Option<Throttle<Size>>,
    hover: Option<Throttle<Vec2>>,
}

fn hover_pick(screen: &mut Screen, point: Vec2) {
    let range = screen.config().hover_range;
    screen.request_pick(PickQuery::Closest {
        x: point.x,
        y: point.y,
        range,
    });
}

impl shader::Program<ScreenMessage> for ScreenView {
    type State = ViewState;
    type Primitive = ScreenPrimitive;

    fn draw(
        &self,
        _state: &Self::State,
        _cursor: mouse::Cursor,
        _bounds: Rectangle,
    ) -> Self::Primitive {
        let id = self
            .screen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id();
        ScreenPrimitive {
            screen: Arc::clone(&self.screen),
            id,
        }
    }

    fn update(
        &self,
        state: &mut Self::State,
        event: &iced::Event,
        bounds: Rectangle,
        cursor: mouse::Cursor,
    ) -> Option<shader::Action<ScreenMessage>> {
        let now = self.clock.now();
        let mut screen = self.screen.lock().unwrap_or_else(PoisonError::into_inner);
        if screen.is_disposed() {
            return None;
        }

        // The first size is applied at once, later ones are throttled.
        let resize = state
            .resize
            .get_or_insert_with(|| Throttle::new(screen.config().resize_throttle()));
        let size = bounds.size();
        if state.size != Some(size) {
            let first = state.size.is_none();
            state.size = Some(size);
            if first {
                screen.resize(size.width, size.height);
            } else if let Some(size) = resize.event(now, size) {
                screen.resize(size.width, size.height);
            }
        }
        if let Some(size) = resize.poll(now) {
            screen.resize(size.width, size.height);
        }

        let hover = state
            .hover
            .get_or_insert_with(|| Throttle::new(screen.config().hover_throttle()));
        let mut redraw = false;
        match event {
            iced::Event::Window(window::Event::RedrawRequested(_)) => match screen.frame(now) {
                FrameAction::Stop => {
                    debug!("screen {} stopped rendering", screen.id());
                    return Some(shader::Action::publish(ScreenMessage::Disposed));
                }
                FrameAction::Render | FrameAction::Skip => redraw = true,
            },
            iced::Event::Mouse(mouse::Event::CursorMoved { .. }) => {
                if let Some(position) = cursor.position_in(bounds) {
                    let point = screen.client_to_scene(Vec2::new(position.x, position.y));
                    if let Some(point) = hover.event(now, point) {
                        hover_pick(&mut screen, point);
                    }
                }
            }
            iced::Event::Mouse(mouse::Event::ButtonPressed(mouse::Button::Left)) => {
                if let Some(position) = cursor.position_in(bounds) {
                    let point = screen.client_to_scene(Vec2::new(position.x, position.y));
                    hover_pick(&mut screen, point);
                }
            }
            _ => {}
        }
        if let Some(point) = hover.poll(now) {
            hover_pick(&mut screen, point);
        }

        if let Some(result) = screen.take_pick_result() {
            return Some(shader::Action::publish(ScreenMessage::Picked(result)));
        }
        redraw |= screen.picks().has_request() || hover.is_pending() || resize.is_pending();
        redraw.then(shader::Action::request_redraw)
    }
}

#[doc(hidden)]
pub struct ScreenPrimitive {
    screen: SharedScreen,
    id: u64,
}

impl fmt::Debug for ScreenPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScreenPrimitive")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[doc(hidden)]
pub struct ScreenPipeline {
    renderers: HashMap<u64, SceneRenderer>,
    format: TextureFormat,
}

impl shader::Primitive for ScreenPrimitive {
    type Pipeline = ScreenPipeline;

    fn prepare(
        &self,
        pipeline: &mut Self::Pipeline,
        device: &iced::wgpu::Device,
        queue: &iced::wgpu::Queue,
        bounds: &Rectangle,
        viewport: &Viewport,
    ) {
        let mut screen = self.screen.lock().unwrap_or_else(PoisonError::into_inner);
        let renderer = pipeline
            .renderers
            .entry(self.id)
            .or_insert_with(|| SceneRenderer::new(pipeline.format));
        renderer.prepare(device, queue, &mut screen, bounds, viewport);
        if screen.is_disposed() {
            pipeline.renderers.remove(&self.id);
        }
    }

    fn render(
        &self,
        pipeline: &Self::Pipeline,
        encoder: &mut iced::wgpu::CommandEncoder,
        target: &iced::wgpu::TextureView,
        clip_bounds: &Rectangle<u32>,
    ) {
        if let Some(renderer) = pipeline.renderers.get(&self.id) {
            renderer.render(RenderParams {
                encoder,
                target,
                bounds: *clip_bounds,
            });
        }
    }
}

impl Pipeline for ScreenPipeline {
    fn new(
        _device: &iced::wgpu::Device,
        _queue: &iced::wgpu::Queue,
        format: iced::wgpu::TextureFormat,
    ) -> Self
    where
        Self: Sized,
    {
        ScreenPipeline {
            renderers: HashMap::new(),
            format,
        }
    }
}
