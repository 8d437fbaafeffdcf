//! A simulated host streaming a random walk into a line plot. Hover or click
//! the line to pick points.
use std::sync::{Arc, Mutex, PoisonError};

use iced::Element;
use iced::widget::{column, text};
use iced::window;
use rand_distr::{Distribution, Normal};
use serde_json::json;

use remote_plot::{SceneDescriptor, Screen, ScreenConfig, ScreenMessage, ScreenView};

const POINTS: usize = 400;

fn main() -> iced::Result {
    iced::application(App::new, App::update, App::view)
        .subscription(App::subscription)
        .run()
}

#[derive(Debug, Clone)]
enum Message {
    Screen(ScreenMessage),
    Tick,
}

struct App {
    view: ScreenView,
    walk: Vec<f32>,
    seq: u64,
    status: String,
}

impl App {
    fn send(&mut self, message: serde_json::Value) {
        let mut screen = self
            .view
            .screen()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = screen.handle_message(&message.to_string()) {
            self.status = format!("host message rejected: {err}");
        }
    }

    fn update(&mut self, message: Message) {
        match message {
            Message::Screen(ScreenMessage::Picked(result)) => {
                self.status = match result.hits.first() {
                    Some(hit) => format!("{} point {}", hit.plot, hit.index),
                    None => "nothing under the cursor".to_string(),
                };
            }
            Message::Screen(ScreenMessage::Disposed) => {
                self.status = "screen disposed".to_string();
            }
            Message::Tick => {
                let step = Normal::new(0.0f32, 4.0).unwrap();
                let mut rng = rand::rng();
                let last = self.walk.last().copied().unwrap_or(150.0);
                self.walk.push((last + step.sample(&mut rng)).clamp(10.0, 290.0));
                if self.walk.len() > POINTS {
                    self.walk.remove(0);
                }
                let positions: Vec<[f32; 2]> = self
                    .walk
                    .iter()
                    .enumerate()
                    .map(|(i, y)| [i as f32, *y])
                    .collect();
                // Tagged so the screen applies updates in the order they were made.
                self.seq += 1;
                self.send(json!({
                    "seq": self.seq,
                    "type": "update_plot",
                    "plot": "walk",
                    "updates": [["positions", positions]],
                }));
            }
        }
    }

    fn view(&self) -> Element<'_, Message> {
        column![
            self.view.view().map(Message::Screen),
            text(&self.status).size(14),
        ]
        .into()
    }

    fn subscription(&self) -> iced::Subscription<Message> {
        window::frames().map(|_| Message::Tick)
    }

    fn new() -> Self {
        let mut screen = Screen::new(ScreenConfig::default(), 1.0);
        let scene = SceneDescriptor::from_json(
            &json!({
                "uuid": "root",
                "viewport": [0, 0, POINTS, 300],
                "backgroundcolor": [0.08, 0.08, 0.1, 1.0],
                "camera": {
                    "projection": [
                        2.0 / POINTS as f32, 0, 0, 0,
                        0, 2.0 / 300.0, 0, 0,
                        0, 0, 1, 0,
                        -1, -1, 0, 1
                    ]
                },
                "plots": [{
                    "uuid": "walk",
                    "plot_type": "Lines",
                    "attributes": {"positions": [[0, 150], [1, 150]]},
                    "uniforms": {"linewidth": 2.0, "color": [0.3, 0.7, 1.0, 1.0]}
                }]
            })
            .to_string(),
        )
        .unwrap();
        screen.load_scene(&scene).unwrap();
        Self {
            view: ScreenView::new(Arc::new(Mutex::new(screen))),
            walk: vec![150.0],
            seq: 0,
            status: String::new(),
        }
    }
}
