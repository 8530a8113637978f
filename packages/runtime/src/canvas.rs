//! The drawing-surface import set.
//!
//! Programs built against the canvas library import `canvas_*` functions
//! from the `env` namespace. Each call becomes a [`DrawCommand`] sent to the
//! attached [`DrawingSurface`], or is ignored when no surface is attached.
//! Image data lives host-side in a per-process handle table.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use wasmtime::{Caller, Extern, Linker};

use crate::error::{Error, Result};
use crate::process::caller_memory;
use crate::session::{FrameRequest, ProcessId, Session};

/// Import namespace of the drawing-surface functions.
pub const CANVAS_MODULE: &str = "env";

/// Handle value returned by `canvas_createImageData` when no surface is
/// attached.
pub const NO_HANDLE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCap {
    Butt,
    Round,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineJoin {
    Bevel,
    Round,
    Miter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Right,
    Center,
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBaseline {
    Top,
    Hanging,
    Middle,
    Alphabetic,
    Ideographic,
    Bottom,
}

/// Decode a C enum value passed across the import boundary.
trait FromIndex: Sized + Copy + 'static {
    const VALUES: &'static [Self];

    fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::VALUES.get(i).copied())
    }
}

impl FromIndex for FillRule {
    const VALUES: &'static [Self] = &[FillRule::NonZero, FillRule::EvenOdd];
}

impl FromIndex for LineCap {
    const VALUES: &'static [Self] = &[LineCap::Butt, LineCap::Round, LineCap::Square];
}

impl FromIndex for LineJoin {
    const VALUES: &'static [Self] = &[LineJoin::Bevel, LineJoin::Round, LineJoin::Miter];
}

impl FromIndex for TextAlign {
    const VALUES: &'static [Self] = &[
        TextAlign::Left,
        TextAlign::Right,
        TextAlign::Center,
        TextAlign::Start,
        TextAlign::End,
    ];
}

impl FromIndex for TextBaseline {
    const VALUES: &'static [Self] = &[
        TextBaseline::Top,
        TextBaseline::Hanging,
        TextBaseline::Middle,
        TextBaseline::Alphabetic,
        TextBaseline::Ideographic,
        TextBaseline::Bottom,
    ];
}

/// One drawing operation, with text arguments already read out of the
/// calling program's memory.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    SetWidth(i32),
    SetHeight(i32),
    Arc {
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    },
    ArcTo {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        radius: f64,
    },
    BeginPath,
    BezierCurveTo {
        cp1x: f64,
        cp1y: f64,
        cp2x: f64,
        cp2y: f64,
        x: f64,
        y: f64,
    },
    ClearRect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    },
    Clip(FillRule),
    ClosePath,
    Ellipse {
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    },
    Fill(FillRule),
    FillRect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    },
    FillText {
        text: String,
        x: f64,
        y: f64,
    },
    LineTo {
        x: f64,
        y: f64,
    },
    MoveTo {
        x: f64,
        y: f64,
    },
    QuadraticCurveTo {
        cpx: f64,
        cpy: f64,
        x: f64,
        y: f64,
    },
    Rect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    },
    Restore,
    Rotate(f64),
    Save,
    Scale {
        x: f64,
        y: f64,
    },
    SetTransform([f64; 6]),
    Stroke,
    StrokeRect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    },
    StrokeText {
        text: String,
        x: f64,
        y: f64,
    },
    Transform([f64; 6]),
    Translate {
        x: f64,
        y: f64,
    },
    SetFillStyle(String),
    SetFont(String),
    SetGlobalAlpha(f64),
    SetLineCap(LineCap),
    SetLineDashOffset(f64),
    SetLineJoin(LineJoin),
    SetLineWidth(f64),
    SetMiterLimit(f64),
    SetShadowBlur(f64),
    SetShadowColor(String),
    SetShadowOffsetX(f64),
    SetShadowOffsetY(f64),
    SetStrokeStyle(String),
    SetTextAlign(TextAlign),
    SetTextBaseline(TextBaseline),
}

/// A host-held RGBA pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageData {
    pub fn new(width: i32, height: i32) -> Result<Self> {
        let (width, height) = match (u32::try_from(width), u32::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(Error::assertion(format!(
                    "invalid image size {width}x{height}"
                )))
            }
        };
        Ok(Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        })
    }

    /// Copy `src` into the pixel buffer starting at byte `offset`.
    pub fn set_data(&mut self, src: &[u8], offset: usize) -> Result<()> {
        let size = self.data.len();
        let target = offset
            .checked_add(src.len())
            .and_then(|end| self.data.get_mut(offset..end))
            .ok_or_else(|| Error::OutOfBounds {
                offset: offset as u64,
                len: src.len() as u64,
                size,
            })?;
        target.copy_from_slice(src);
        Ok(())
    }
}

/// Image data owned by one process, keyed by an incrementing handle.
#[derive(Debug, Default)]
pub struct HandleTable {
    images: BTreeMap<u32, ImageData>,
    next: u32,
}

impl HandleTable {
    pub fn insert(&mut self, image: ImageData) -> u32 {
        let handle = self.next;
        self.next = self.next.wrapping_add(1);
        self.images.insert(handle, image);
        handle
    }

    pub fn get(&self, handle: u32) -> Option<&ImageData> {
        self.images.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut ImageData> {
        self.images.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: u32) -> Option<ImageData> {
        self.images.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// A 2D drawing target that programs render into.
pub trait DrawingSurface: Send {
    fn draw(&mut self, command: DrawCommand);

    /// Width of `text` in the current font.
    fn measure_text(&mut self, text: &str) -> f64;

    fn put_image_data(&mut self, image: &ImageData, x: f64, y: f64);
}

/// What a [`RecordingSurface`] saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Draw(DrawCommand),
    PutImageData {
        width: u32,
        height: u32,
        x: f64,
        y: f64,
    },
}

/// A surface that records every call into a shared log.
///
/// Clones share the log, so one clone can be attached to a pipeline while
/// another is kept for inspection.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    log: Arc<Mutex<Vec<Recorded>>>,
    char_width: f64,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            char_width: 8.0,
        }
    }

    /// Everything recorded so far.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, entry: Recorded) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingSurface for RecordingSurface {
    fn draw(&mut self, command: DrawCommand) {
        self.push(Recorded::Draw(command));
    }

    fn measure_text(&mut self, text: &str) -> f64 {
        text.chars().count() as f64 * self.char_width
    }

    fn put_image_data(&mut self, image: &ImageData, x: f64, y: f64) {
        self.push(Recorded::PutImageData {
            width: image.width,
            height: image.height,
            x,
            y,
        });
    }
}

/// Every drawing-surface import a process can link against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum CanvasCall {
    #[strum(serialize = "canvas_arc")]
    Arc,
    #[strum(serialize = "canvas_arcTo")]
    ArcTo,
    #[strum(serialize = "canvas_beginPath")]
    BeginPath,
    #[strum(serialize = "canvas_bezierCurveTo")]
    BezierCurveTo,
    #[strum(serialize = "canvas_clearRect")]
    ClearRect,
    #[strum(serialize = "canvas_clip")]
    Clip,
    #[strum(serialize = "canvas_closePath")]
    ClosePath,
    #[strum(serialize = "canvas_createImageData")]
    CreateImageData,
    #[strum(serialize = "canvas_destroyHandle")]
    DestroyHandle,
    #[strum(serialize = "canvas_ellipse")]
    Ellipse,
    #[strum(serialize = "canvas_fill")]
    Fill,
    #[strum(serialize = "canvas_fillRect")]
    FillRect,
    #[strum(serialize = "canvas_fillText")]
    FillText,
    #[strum(serialize = "canvas_imageDataSetData")]
    ImageDataSetData,
    #[strum(serialize = "canvas_lineTo")]
    LineTo,
    #[strum(serialize = "canvas_measureText")]
    MeasureText,
    #[strum(serialize = "canvas_moveTo")]
    MoveTo,
    #[strum(serialize = "canvas_putImageData")]
    PutImageData,
    #[strum(serialize = "canvas_quadraticCurveTo")]
    QuadraticCurveTo,
    #[strum(serialize = "canvas_rect")]
    Rect,
    #[strum(serialize = "canvas_requestAnimationFrame")]
    RequestAnimationFrame,
    #[strum(serialize = "canvas_restore")]
    Restore,
    #[strum(serialize = "canvas_rotate")]
    Rotate,
    #[strum(serialize = "canvas_save")]
    Save,
    #[strum(serialize = "canvas_scale")]
    Scale,
    #[strum(serialize = "canvas_setFillStyle")]
    SetFillStyle,
    #[strum(serialize = "canvas_setFont")]
    SetFont,
    #[strum(serialize = "canvas_setGlobalAlpha")]
    SetGlobalAlpha,
    #[strum(serialize = "canvas_setHeight")]
    SetHeight,
    #[strum(serialize = "canvas_setLineCap")]
    SetLineCap,
    #[strum(serialize = "canvas_setLineDashOffset")]
    SetLineDashOffset,
    #[strum(serialize = "canvas_setLineJoin")]
    SetLineJoin,
    #[strum(serialize = "canvas_setLineWidth")]
    SetLineWidth,
    #[strum(serialize = "canvas_setMiterLimit")]
    SetMiterLimit,
    #[strum(serialize = "canvas_setShadowBlur")]
    SetShadowBlur,
    #[strum(serialize = "canvas_setShadowColor")]
    SetShadowColor,
    #[strum(serialize = "canvas_setShadowOffsetX")]
    SetShadowOffsetX,
    #[strum(serialize = "canvas_setShadowOffsetY")]
    SetShadowOffsetY,
    #[strum(serialize = "canvas_setStrokeStyle")]
    SetStrokeStyle,
    #[strum(serialize = "canvas_setTextAlign")]
    SetTextAlign,
    #[strum(serialize = "canvas_setTextBaseline")]
    SetTextBaseline,
    #[strum(serialize = "canvas_setTransform")]
    SetTransform,
    #[strum(serialize = "canvas_setWidth")]
    SetWidth,
    #[strum(serialize = "canvas_stroke")]
    Stroke,
    #[strum(serialize = "canvas_strokeRect")]
    StrokeRect,
    #[strum(serialize = "canvas_strokeText")]
    StrokeText,
    #[strum(serialize = "canvas_transform")]
    Transform,
    #[strum(serialize = "canvas_translate")]
    Translate,
}

impl CanvasCall {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

type Host<'a> = Caller<'a, Session>;

fn draw(caller: &mut Host<'_>, command: DrawCommand) {
    if let Some(surface) = caller.data_mut().surface.as_mut() {
        surface.draw(command);
    }
}

fn has_surface(caller: &Host<'_>) -> bool {
    caller.data().surface.is_some()
}

/// Read `[ptr, ptr + len)` of the calling program's memory as text.
fn read_text(caller: &mut Host<'_>, ptr: u32, len: u32) -> wasmtime::Result<String> {
    let memory = caller_memory(caller)?;
    memory
        .view(&mut *caller)
        .read_str(ptr, Some(len))
        .map_err(Error::into_trap)
}

/// Draw a command whose only argument is a string in program memory.
fn draw_text(
    caller: &mut Host<'_>,
    ptr: u32,
    len: u32,
    command: impl FnOnce(String) -> DrawCommand,
) -> wasmtime::Result<()> {
    if has_surface(caller) {
        let text = read_text(caller, ptr, len)?;
        draw(caller, command(text));
    }
    Ok(())
}

fn draw_indexed<E: FromIndex>(caller: &mut Host<'_>, index: i32, command: impl FnOnce(E) -> DrawCommand) {
    if let Some(value) = E::from_index(index) {
        draw(caller, command(value));
    }
}

/// Bind the whole drawing-surface import set for one process.
pub(crate) fn bind(linker: &mut Linker<Session>, process: ProcessId) -> Result<()> {
    for call in CanvasCall::iter() {
        bind_one(linker, call, process)?;
    }
    Ok(())
}

fn bind_one(linker: &mut Linker<Session>, call: CanvasCall, process: ProcessId) -> Result<()> {
    let name = call.name();
    let m = CANVAS_MODULE;
    match call {
        CanvasCall::Arc => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, x: f64, y: f64, radius: f64, start_angle: f64, end_angle: f64, ccw: i32| {
                draw(
                    &mut c,
                    DrawCommand::Arc {
                        x,
                        y,
                        radius,
                        start_angle,
                        end_angle,
                        anticlockwise: ccw != 0,
                    },
                )
            },
        ),
        CanvasCall::ArcTo => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, x1: f64, y1: f64, x2: f64, y2: f64, radius: f64| {
                draw(&mut c, DrawCommand::ArcTo { x1, y1, x2, y2, radius })
            },
        ),
        CanvasCall::BeginPath => {
            linker.func_wrap(m, name, |mut c: Host<'_>| draw(&mut c, DrawCommand::BeginPath))
        }
        CanvasCall::BezierCurveTo => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64| {
                draw(
                    &mut c,
                    DrawCommand::BezierCurveTo {
                        cp1x,
                        cp1y,
                        cp2x,
                        cp2y,
                        x,
                        y,
                    },
                )
            },
        ),
        CanvasCall::ClearRect => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, x: f64, y: f64, w: f64, h: f64| {
                draw(&mut c, DrawCommand::ClearRect { x, y, w, h })
            },
        ),
        CanvasCall::Clip => linker.func_wrap(m, name, |mut c: Host<'_>, rule: i32| {
            let rule = FillRule::from_index(rule).unwrap_or_default();
            draw(&mut c, DrawCommand::Clip(rule))
        }),
        CanvasCall::ClosePath => {
            linker.func_wrap(m, name, |mut c: Host<'_>| draw(&mut c, DrawCommand::ClosePath))
        }
        CanvasCall::CreateImageData => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, w: i32, h: i32| -> wasmtime::Result<i32> {
                if !has_surface(&c) {
                    return Ok(NO_HANDLE);
                }
                let image = ImageData::new(w, h).map_err(Error::into_trap)?;
                let slot = c.data_mut().process_mut(process).map_err(Error::into_trap)?;
                Ok(slot.handles.insert(image) as i32)
            },
        ),
        CanvasCall::DestroyHandle => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, handle: u32| -> wasmtime::Result<()> {
                let slot = c.data_mut().process_mut(process).map_err(Error::into_trap)?;
                slot.handles.remove(handle);
                Ok(())
            },
        ),
        CanvasCall::Ellipse => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>,
             x: f64,
             y: f64,
             radius_x: f64,
             radius_y: f64,
             rotation: f64,
             start_angle: f64,
             end_angle: f64,
             ccw: i32| {
                draw(
                    &mut c,
                    DrawCommand::Ellipse {
                        x,
                        y,
                        radius_x,
                        radius_y,
                        rotation,
                        start_angle,
                        end_angle,
                        anticlockwise: ccw != 0,
                    },
                )
            },
        ),
        CanvasCall::Fill => linker.func_wrap(m, name, |mut c: Host<'_>, rule: i32| {
            let rule = FillRule::from_index(rule).unwrap_or_default();
            draw(&mut c, DrawCommand::Fill(rule))
        }),
        CanvasCall::FillRect => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, x: f64, y: f64, w: f64, h: f64| {
                draw(&mut c, DrawCommand::FillRect { x, y, w, h })
            },
        ),
        CanvasCall::FillText => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, ptr: u32, len: u32, x: f64, y: f64| {
                draw_text(&mut c, ptr, len, |text| DrawCommand::FillText { text, x, y })
            },
        ),
        CanvasCall::ImageDataSetData => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, handle: u32, buffer: u32, offset: u32, size: u32| -> wasmtime::Result<()> {
                let memory = caller_memory(&mut c)?;
                let (view, session) = memory.view_with_data(&mut c);
                let slot = session.process_mut(process).map_err(Error::into_trap)?;
                if let Some(image) = slot.handles.get_mut(handle) {
                    let src = view.bytes(buffer, size).map_err(Error::into_trap)?;
                    image
                        .set_data(src, offset as usize)
                        .map_err(Error::into_trap)?;
                }
                Ok(())
            },
        ),
        CanvasCall::LineTo => linker.func_wrap(m, name, |mut c: Host<'_>, x: f64, y: f64| {
            draw(&mut c, DrawCommand::LineTo { x, y })
        }),
        CanvasCall::MeasureText => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, ptr: u32, len: u32| -> wasmtime::Result<f64> {
                if !has_surface(&c) {
                    return Ok(0.0);
                }
                let text = read_text(&mut c, ptr, len)?;
                Ok(c
                    .data_mut()
                    .surface
                    .as_mut()
                    .map_or(0.0, |surface| surface.measure_text(&text)))
            },
        ),
        CanvasCall::MoveTo => linker.func_wrap(m, name, |mut c: Host<'_>, x: f64, y: f64| {
            draw(&mut c, DrawCommand::MoveTo { x, y })
        }),
        CanvasCall::PutImageData => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, handle: u32, x: f64, y: f64| -> wasmtime::Result<()> {
                let session = c.data_mut();
                let Some(surface) = session.surface.as_mut() else {
                    return Ok(());
                };
                let slot = session
                    .processes
                    .get(&process)
                    .ok_or_else(|| Error::assertion(format!("unknown process {process}")).into_trap())?;
                if let Some(image) = slot.handles.get(handle) {
                    surface.put_image_data(image, x, y);
                }
                Ok(())
            },
        ),
        CanvasCall::QuadraticCurveTo => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, cpx: f64, cpy: f64, x: f64, y: f64| {
                draw(&mut c, DrawCommand::QuadraticCurveTo { cpx, cpy, x, y })
            },
        ),
        CanvasCall::Rect => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, x: f64, y: f64, w: f64, h: f64| {
                draw(&mut c, DrawCommand::Rect { x, y, w, h })
            },
        ),
        CanvasCall::RequestAnimationFrame => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>| -> wasmtime::Result<()> {
                let callback = c.get_export("canvas_loop").and_then(Extern::into_func);
                let session = c.data_mut();
                let slot = session.process_mut(process).map_err(Error::into_trap)?;
                if !slot.continuation.load(Ordering::Acquire) {
                    return Ok(());
                }
                let continuation = Arc::clone(&slot.continuation);
                match callback {
                    Some(callback) => session.frames.push(FrameRequest {
                        process,
                        callback,
                        continuation,
                    }),
                    None => tracing::warn!(%process, "animation frame requested without a canvas_loop export"),
                }
                Ok(())
            },
        ),
        CanvasCall::Restore => {
            linker.func_wrap(m, name, |mut c: Host<'_>| draw(&mut c, DrawCommand::Restore))
        }
        CanvasCall::Rotate => linker.func_wrap(m, name, |mut c: Host<'_>, angle: f64| {
            draw(&mut c, DrawCommand::Rotate(angle))
        }),
        CanvasCall::Save => linker.func_wrap(m, name, |mut c: Host<'_>| draw(&mut c, DrawCommand::Save)),
        CanvasCall::Scale => linker.func_wrap(m, name, |mut c: Host<'_>, x: f64, y: f64| {
            draw(&mut c, DrawCommand::Scale { x, y })
        }),
        CanvasCall::SetFillStyle => linker.func_wrap(m, name, |mut c: Host<'_>, ptr: u32, len: u32| {
            draw_text(&mut c, ptr, len, DrawCommand::SetFillStyle)
        }),
        CanvasCall::SetFont => linker.func_wrap(m, name, |mut c: Host<'_>, ptr: u32, len: u32| {
            draw_text(&mut c, ptr, len, DrawCommand::SetFont)
        }),
        CanvasCall::SetGlobalAlpha => linker.func_wrap(m, name, |mut c: Host<'_>, value: f64| {
            draw(&mut c, DrawCommand::SetGlobalAlpha(value))
        }),
        CanvasCall::SetHeight => linker.func_wrap(m, name, |mut c: Host<'_>, height: i32| {
            draw(&mut c, DrawCommand::SetHeight(height))
        }),
        CanvasCall::SetLineCap => linker.func_wrap(m, name, |mut c: Host<'_>, value: i32| {
            draw_indexed(&mut c, value, DrawCommand::SetLineCap)
        }),
        CanvasCall::SetLineDashOffset => linker.func_wrap(m, name, |mut c: Host<'_>, value: f64| {
            draw(&mut c, DrawCommand::SetLineDashOffset(value))
        }),
        CanvasCall::SetLineJoin => linker.func_wrap(m, name, |mut c: Host<'_>, value: i32| {
            draw_indexed(&mut c, value, DrawCommand::SetLineJoin)
        }),
        CanvasCall::SetLineWidth => linker.func_wrap(m, name, |mut c: Host<'_>, value: f64| {
            draw(&mut c, DrawCommand::SetLineWidth(value))
        }),
        CanvasCall::SetMiterLimit => linker.func_wrap(m, name, |mut c: Host<'_>, value: f64| {
            draw(&mut c, DrawCommand::SetMiterLimit(value))
        }),
        CanvasCall::SetShadowBlur => linker.func_wrap(m, name, |mut c: Host<'_>, value: f64| {
            draw(&mut c, DrawCommand::SetShadowBlur(value))
        }),
        CanvasCall::SetShadowColor => linker.func_wrap(m, name, |mut c: Host<'_>, ptr: u32, len: u32| {
            draw_text(&mut c, ptr, len, DrawCommand::SetShadowColor)
        }),
        CanvasCall::SetShadowOffsetX => linker.func_wrap(m, name, |mut c: Host<'_>, value: f64| {
            draw(&mut c, DrawCommand::SetShadowOffsetX(value))
        }),
        CanvasCall::SetShadowOffsetY => linker.func_wrap(m, name, |mut c: Host<'_>, value: f64| {
            draw(&mut c, DrawCommand::SetShadowOffsetY(value))
        }),
        CanvasCall::SetStrokeStyle => linker.func_wrap(m, name, |mut c: Host<'_>, ptr: u32, len: u32| {
            draw_text(&mut c, ptr, len, DrawCommand::SetStrokeStyle)
        }),
        CanvasCall::SetTextAlign => linker.func_wrap(m, name, |mut c: Host<'_>, value: i32| {
            draw_indexed(&mut c, value, DrawCommand::SetTextAlign)
        }),
        CanvasCall::SetTextBaseline => linker.func_wrap(m, name, |mut c: Host<'_>, value: i32| {
            draw_indexed(&mut c, value, DrawCommand::SetTextBaseline)
        }),
        CanvasCall::SetTransform => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, a: f64, b: f64, cc: f64, d: f64, e: f64, f: f64| {
                draw(&mut c, DrawCommand::SetTransform([a, b, cc, d, e, f]))
            },
        ),
        CanvasCall::SetWidth => linker.func_wrap(m, name, |mut c: Host<'_>, width: i32| {
            draw(&mut c, DrawCommand::SetWidth(width))
        }),
        CanvasCall::Stroke => linker.func_wrap(m, name, |mut c: Host<'_>| draw(&mut c, DrawCommand::Stroke)),
        CanvasCall::StrokeRect => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, x: f64, y: f64, w: f64, h: f64| {
                draw(&mut c, DrawCommand::StrokeRect { x, y, w, h })
            },
        ),
        CanvasCall::StrokeText => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, ptr: u32, len: u32, x: f64, y: f64| {
                draw_text(&mut c, ptr, len, |text| DrawCommand::StrokeText { text, x, y })
            },
        ),
        CanvasCall::Transform => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, a: f64, b: f64, cc: f64, d: f64, e: f64, f: f64| {
                draw(&mut c, DrawCommand::Transform([a, b, cc, d, e, f]))
            },
        ),
        CanvasCall::Translate => linker.func_wrap(m, name, |mut c: Host<'_>, x: f64, y: f64| {
            draw(&mut c, DrawCommand::Translate { x, y })
        }),
    }
    .map_err(Error::from)?;
    Ok(())
}
