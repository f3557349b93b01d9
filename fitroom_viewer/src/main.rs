use std::{cell::Cell, rc::Rc, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use pollster::FutureExt;
use wgpu::SurfaceError;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::WindowBuilder,
};

use fitroom_scene::{AssetLoader, Color, FitParams, NullResources, SceneEngine};

mod cli;
mod gpu;
mod shaders;
mod viewer;

use cli::Args;
use viewer::ViewerState;

/// Tints the garment cycles through on the C key.
const TINT_PALETTE: [&str; 5] = ["#ffffff", "#ff0000", "#2266ff", "#22aa44", "#222222"];

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::init();

    let params = match args.fit_preset.as_deref() {
        Some(path) => cli::load_fit_preset(path)?,
        None => FitParams::default(),
    };
    let color = Color::from_hex(&args.color).context("parsing --color")?;

    if args.headless {
        return run_headless(&args, params, color);
    }

    let event_loop = EventLoop::new().context("creating winit event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Fitroom")
            .with_inner_size(PhysicalSize::new(1280, 720))
            .build(&event_loop)
            .context("creating viewer window")?,
    );

    let mut state = ViewerState::new(window, params, args.fov).block_on()?;

    let loading = Rc::new(Cell::new(false));
    {
        let flag = loading.clone();
        state.engine_mut().set_loading_listener(move || flag.set(false));
    }

    state.engine_mut().set_garment_color(color);
    state.engine_mut().set_garment_visible(!args.hide_garment);

    let loader = AssetLoader::new();
    if let Some(request) = state.engine_mut().set_avatar_source(args.avatar.as_deref()) {
        loading.set(true);
        loader.dispatch(request);
    }
    if let Some(request) = state
        .engine_mut()
        .set_garment_source(args.garment.as_deref())
    {
        loading.set(true);
        loader.dispatch(request);
    }

    let mut palette_index = 0usize;
    let mut title_shows_loading = false;

    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { window_id, event } if window_id == state.window().id() => {
                    match event {
                        WindowEvent::CloseRequested => {
                            state.teardown();
                            target.exit();
                        }
                        WindowEvent::KeyboardInput {
                            event:
                                KeyEvent {
                                    logical_key: Key::Named(NamedKey::Escape),
                                    state: ElementState::Pressed,
                                    ..
                                },
                            ..
                        } => {
                            state.teardown();
                            target.exit();
                        }
                        WindowEvent::KeyboardInput {
                            event:
                                KeyEvent {
                                    logical_key: Key::Character(ref text),
                                    state: ElementState::Pressed,
                                    ..
                                },
                            ..
                        } => match text.as_str() {
                            "v" | "V" => {
                                let visible = !state.engine().garment_visible();
                                state.engine_mut().set_garment_visible(visible);
                            }
                            "c" | "C" => {
                                palette_index = (palette_index + 1) % TINT_PALETTE.len();
                                if let Ok(tint) = Color::from_hex(TINT_PALETTE[palette_index]) {
                                    state.engine_mut().set_garment_color(tint);
                                }
                            }
                            "r" | "R" => {
                                state.engine_mut().reset();
                                palette_index = 0;
                            }
                            _ => {}
                        },
                        WindowEvent::MouseInput {
                            state: button_state,
                            button: MouseButton::Left,
                            ..
                        } => state.mouse_button(button_state == ElementState::Pressed),
                        WindowEvent::CursorMoved { position, .. } => {
                            state.cursor_moved(position.x, position.y)
                        }
                        WindowEvent::MouseWheel { delta, .. } => {
                            let lines = match delta {
                                MouseScrollDelta::LineDelta(_, y) => y,
                                MouseScrollDelta::PixelDelta(position) => {
                                    position.y as f32 / 60.0
                                }
                            };
                            state.wheel(lines);
                        }
                        WindowEvent::Resized(new_size) => state.resize(new_size),
                        WindowEvent::RedrawRequested => {
                            for outcome in loader.poll() {
                                state.engine_mut().finish_load(outcome);
                            }

                            let is_loading = loading.get();
                            if is_loading != title_shows_loading {
                                title_shows_loading = is_loading;
                                let title = if is_loading {
                                    "Fitroom (loading...)"
                                } else {
                                    "Fitroom"
                                };
                                state.window().set_title(title);
                            }

                            match state.render() {
                                Ok(()) => {}
                                Err(SurfaceError::Lost) => state.resize(state.size()),
                                Err(SurfaceError::OutOfMemory) => target.exit(),
                                Err(err) => log::warn!("render error: {err:?}"),
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => state.window().request_redraw(),
                _ => {}
            }
        })
        .context("running viewer application")?;
    Ok(())
}

/// Decode and fit with the headless backend, then print what the viewport
/// would show. Exercises the full load/fit/coverage path without a GPU.
fn run_headless(args: &Args, params: FitParams, color: Color) -> Result<()> {
    let mut engine = SceneEngine::new(NullResources::new(), params);
    engine.camera_mut().fov_y_degrees = args.fov;
    engine.set_garment_color(color);
    engine.set_garment_visible(!args.hide_garment);

    let loader = AssetLoader::new();
    let mut outstanding = 0u32;
    if let Some(request) = engine.set_avatar_source(args.avatar.as_deref()) {
        loader.dispatch(request);
        outstanding += 1;
    }
    if let Some(request) = engine.set_garment_source(args.garment.as_deref()) {
        loader.dispatch(request);
        outstanding += 1;
    }
    for _ in 0..outstanding {
        if let Some(outcome) = loader.wait() {
            engine.finish_load(outcome);
        }
    }

    match engine.avatar() {
        Some(avatar) => {
            let size = avatar.bounds.size();
            println!(
                "Avatar: {} bones, bounds {:.2} x {:.2} x {:.2}",
                avatar.bone_index.len(),
                size.x,
                size.y,
                size.z
            );
            println!(
                "Camera: distance {:.2}, target height {:.2}",
                engine.orbit().distance(),
                engine.orbit().target.y
            );
        }
        None => println!("Avatar: none"),
    }
    match engine.garment() {
        Some(garment) => {
            match (&garment.bound_bones, garment.fit) {
                (Some(bones), _) => println!("Garment: skeleton bind ({} bones)", bones.len()),
                (None, Some(fit)) => {
                    println!("Garment: bounding-box fit, scale {:.3}", fit.scale)
                }
                (None, None) => println!("Garment: installed without fit"),
            }
            println!("Covered avatar parts: {}", engine.hidden().len());
        }
        None => println!("Garment: none"),
    }
    println!("Renderable meshes: {}", engine.draw_items().len());
    Ok(())
}
