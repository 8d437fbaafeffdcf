//! Host message streams driven through a whole `Screen`, without a GPU.
use rand_distr::{Distribution, Normal};
use serde_json::json;

use remote_plot::line::shader::ColorInput;
use remote_plot::picking::{self, PickQuery, PickWindow};
use remote_plot::{Error, PlotId, SceneDescriptor, Screen, ScreenConfig};

fn screen_with_line() -> Screen {
    let mut screen = Screen::new(ScreenConfig::default(), 1.0);
    let scene = SceneDescriptor::from_json(
        &json!({
            "uuid": "root",
            "viewport": [0, 0, 400, 300],
            "plots": [{
                "uuid": "line",
                "plot_type": "Lines",
                "attributes": {
                    "positions": [[0, 0], [10, 0], [10, 10]],
                    "color": [[1, 0, 0, 1], [0, 1, 0, 1], [0, 0, 1, 1]]
                },
                "uniforms": {"linewidth": 3.0}
            }]
        })
        .to_string(),
    )
    .unwrap();
    screen.load_scene(&scene).unwrap();
    screen.resize(400.0, 300.0);
    screen
}

fn update(seq: Option<u64>, updates: serde_json::Value) -> String {
    let mut message = json!({"type": "update_plot", "plot": "line", "updates": updates});
    if let Some(seq) = seq {
        message["seq"] = json!(seq);
    }
    message.to_string()
}

#[test]
fn line_grows_once_all_streams_agree() {
    let mut screen = screen_with_line();
    let id = PlotId::from("line");
    let plot = screen.registry().find_plot(&id).unwrap();
    assert_eq!(plot.instance_count(), 2);
    assert_eq!(plot.shader().color, ColorInput::Rgba);
    let buffer_before = plot
        .kind()
        .line()
        .geometry()
        .buffer("positions")
        .unwrap()
        .id();

    // Positions alone disagree with the colors; the old geometry stays.
    let grown = json!([[0, 0], [10, 0], [10, 10], [20, 10], [20, 20]]);
    screen
        .handle_message(&update(None, json!([["positions", grown]])))
        .unwrap();
    assert_eq!(screen.registry().find_plot(&id).unwrap().instance_count(), 2);

    let colors = json!([
        [1, 0, 0, 1], [0, 1, 0, 1], [0, 0, 1, 1], [1, 1, 0, 1], [0, 1, 1, 1]
    ]);
    screen
        .handle_message(&update(None, json!([["color", colors]])))
        .unwrap();
    let plot = screen.registry().find_plot(&id).unwrap();
    assert_eq!(plot.instance_count(), 4);
    let buffer_after = plot
        .kind()
        .line()
        .geometry()
        .buffer("positions")
        .unwrap()
        .id();
    assert_ne!(buffer_before, buffer_after);
}

#[test]
fn default_line_takes_per_point_colors() {
    let mut screen = Screen::new(ScreenConfig::default(), 1.0);
    let scene = SceneDescriptor::from_json(
        &json!({
            "uuid": "S1",
            "viewport": [0, 0, 400, 300],
            "plots": [{
                "uuid": "line",
                "plot_type": "Lines",
                "attributes": {"positions": [[0, 0], [10, 0], [10, 10]]}
            }]
        })
        .to_string(),
    )
    .unwrap();
    screen.load_scene(&scene).unwrap();
    let id = PlotId::from("line");
    let attributes = |screen: &Screen| {
        let plot = screen.registry().find_plot(&id).unwrap();
        let buffer = plot.kind().line().geometry().buffer("attributes").unwrap();
        (buffer.id(), buffer.record())
    };
    let plot = screen.registry().find_plot(&id).unwrap();
    assert_eq!(plot.shader().color, ColorInput::Uniform);
    assert_eq!(plot.instance_count(), 2);
    let (before, record_before) = attributes(&screen);

    let colors = json!([[1, 0, 0, 1], [0, 1, 0, 1], [0, 0, 1, 1]]);
    screen
        .handle_message(&update(None, json!([["color", colors]])))
        .unwrap();
    let plot = screen.registry().find_plot(&id).unwrap();
    assert_eq!(plot.shader().color, ColorInput::Rgba);
    assert_eq!(plot.instance_count(), 2);
    let (after, record_after) = attributes(&screen);
    assert_ne!(before, after);
    assert_eq!(record_after, record_before + 4);
    assert_eq!(plot.pick_index(0), Some(0));
    assert_eq!(plot.pick_index(1), Some(1));
    assert_eq!(plot.pick_index(2), None);

    // one uniform color again
    screen
        .handle_message(&update(None, json!([["color", [0, 0, 0, 1]]])))
        .unwrap();
    let plot = screen.registry().find_plot(&id).unwrap();
    assert_eq!(plot.shader().color, ColorInput::Uniform);
    assert_eq!(plot.instance_count(), 2);
    assert_eq!(attributes(&screen).1, record_before);
}

#[test]
fn sequenced_updates_apply_in_order() {
    let mut screen = screen_with_line();
    let id = PlotId::from("line");
    let width = |screen: &Screen| {
        screen
            .registry()
            .find_plot(&id)
            .unwrap()
            .uniforms()
            .get("linewidth")
            .cloned()
    };

    screen
        .handle_message(&update(Some(2), json!([["linewidth", 2]])))
        .unwrap();
    assert_eq!(width(&screen), Some(remote_plot::uniform::Uniform::Float(3.0)));

    screen
        .handle_message(&update(Some(1), json!([["linewidth", 1]])))
        .unwrap();
    // 1 then the buffered 2 ran.
    assert_eq!(width(&screen), Some(remote_plot::uniform::Uniform::Float(2.0)));

    screen
        .handle_message(&update(Some(3), json!([["linewidth", 7]])))
        .unwrap();
    assert_eq!(width(&screen), Some(remote_plot::uniform::Uniform::Float(7.0)));
}

#[test]
fn duplicate_sequence_is_rejected() {
    let mut screen = screen_with_line();
    screen
        .handle_message(&update(Some(1), json!([["linewidth", 2]])))
        .unwrap();
    let err = screen
        .handle_message(&update(Some(1), json!([["linewidth", 5]])))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateSequence(1)));
}

#[test]
fn noisy_walk_draws_every_segment() {
    let mut screen = screen_with_line();
    let step = Normal::new(0.0f32, 5.0).unwrap();
    let mut rng = rand::rng();
    let n = 2000;
    let mut y = 0.0f32;
    let mut positions = Vec::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    for i in 0..n {
        y += step.sample(&mut rng);
        positions.push([i as f32, y]);
        colors.push([0.0, 0.0, 0.0, 1.0]);
    }
    screen
        .handle_message(&update(
            None,
            json!([["positions", positions], ["color", colors]]),
        ))
        .unwrap();
    let plot = screen.registry().find_plot(&PlotId::from("line")).unwrap();
    assert_eq!(plot.instance_count(), n - 1);
    assert_eq!(plot.pick_index(0), Some(0));
    assert_eq!(plot.pick_index((n - 2) as u32), Some((n - 2) as u32));
}

#[test]
fn pick_texels_resolve_to_points() {
    let screen = screen_with_line();
    let query = PickQuery::Closest {
        x: 100.0,
        y: 200.0,
        range: 2.0,
    };
    let window = PickWindow::new(&query, screen.px_per_unit(), screen.pick_size()).unwrap();
    let mut texels = vec![[0u32, 0u32]; (window.width * window.height) as usize];
    // Object 1 one pixel right of the center on instance 1, and on
    // instance 0 in the window's corner.
    let row = (window.cy - window.y as i32) as u32;
    let col = (window.cx - window.x as i32) as u32 + 1;
    texels[(row * window.width + col) as usize] = [1, 1];
    texels[0] = [1, 0];

    let objects = vec![PlotId::from("line")];
    let registry = screen.registry();
    let hits = picking::resolve(&query, &window, &texels, &objects, |id, instance| {
        registry.find_plot(id).and_then(|p| p.pick_index(instance))
    });
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].plot, PlotId::from("line"));
    assert_eq!(hits[0].index, 1);
}
