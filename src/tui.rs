use atlas_maps::{
    AtlasMap, RetainedScene, SceneGraph,
    overlays::legend::Legend,
    scene::{Curve, Node, Property, Shape},
};
use geo::{Coord, LineString};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    symbols::Marker,
    text::{Line as TextLine, Span},
    widgets::{
        Block, Borders, List, ListItem, ListState, Paragraph, Wrap,
        canvas::{Canvas, Circle, Context, Line},
    },
};
use std::str::FromStr;

use crate::state::AppState;

pub fn draw(f: &mut Frame, state: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(60),
            Constraint::Percentage(20),
        ])
        .split(f.area());

    // left: regions of the current scope
    let items: Vec<ListItem> = state
        .list_items
        .iter()
        .map(|(id, name)| ListItem::new(format!("{id}  {name}")))
        .collect();
    let mut list_state = ListState::default();
    list_state.select(Some(state.selected));
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(state.map.scope().to_string()))
        .highlight_symbol(">> ")
        .highlight_style(Style::default().fg(Color::Red));
    f.render_stateful_widget(list, chunks[0], &mut list_state);

    // center: the scene
    let block = Block::default().borders(Borders::ALL).title("Map");
    state.map_area = Some(block.inner(chunks[1]));
    let (width, height) = state.map.options().viewport();
    let map = &state.map;
    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds([0.0, width])
        .y_bounds([0.0, height])
        .paint(|ctx| paint_scene(ctx, map, height));
    f.render_widget(canvas, chunks[1]);

    // right: info, popup, legend
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Percentage(25),
            Constraint::Percentage(35),
        ])
        .split(chunks[2]);

    let info = Paragraph::new(state.info.clone())
        .block(Block::default().borders(Borders::ALL).title("Info"))
        .wrap(Wrap { trim: true });
    f.render_widget(info, right[0]);

    let popup = state.map.popup();
    let popup_text = if popup.visible { popup.content.clone() } else { String::new() };
    let popup = Paragraph::new(popup_text)
        .block(Block::default().borders(Borders::ALL).title("Hover"))
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: true });
    f.render_widget(popup, right[1]);

    let legend = legend_lines(map);
    let legend = Paragraph::new(legend)
        .block(Block::default().borders(Borders::ALL).title("Legend"))
        .wrap(Wrap { trim: true });
    f.render_widget(legend, right[2]);
}

fn color_of(node: &Node, property: Property) -> Option<Color> {
    let raw = node.color(property)?;
    if raw == "none" {
        return None;
    }
    Some(Color::from_str(raw).unwrap_or(Color::White))
}

fn paint_scene(ctx: &mut Context, map: &AtlasMap<RetainedScene>, height: f64) {
    let scene = map.scene();
    for layer in scene.layers() {
        let scale = scene.layer_scale(layer);
        let at = |c: Coord<f64>| (c.x * scale, height - c.y * scale);

        for id in scene.nodes(layer) {
            let Some(node) = scene.node(id) else {
                continue;
            };
            if node.number(Property::Opacity).is_some_and(|o| o < 0.05) {
                continue;
            }
            match &node.shape {
                Shape::Region(polygons) => {
                    let color = color_of(node, Property::Fill).unwrap_or(Color::White);
                    for poly in polygons {
                        outline(ctx, poly.exterior(), color, &at);
                    }
                }
                Shape::Circle { center: Some(center) } => {
                    let radius = node.number(Property::Radius).unwrap_or(0.0) * scale;
                    if radius > 0.0 {
                        let (x, y) = at(*center);
                        let color = color_of(node, Property::Fill).unwrap_or(Color::White);
                        ctx.draw(&Circle { x, y, radius, color });
                    }
                }
                Shape::Circle { center: None } => {}
                Shape::Curve(curve) => {
                    let color = color_of(node, Property::Stroke).unwrap_or(Color::Magenta);
                    draw_dashed(ctx, curve, node, color, &at);
                }
                Shape::Lines(lines) => {
                    let color = color_of(node, Property::Stroke).unwrap_or(Color::DarkGray);
                    for line in lines {
                        outline(ctx, line, color, &at);
                    }
                }
                Shape::Segment(segment) => {
                    let color = color_of(node, Property::Stroke).unwrap_or(Color::White);
                    let ((x1, y1), (x2, y2)) = (at(segment.start), at(segment.end));
                    ctx.draw(&Line::new(x1, y1, x2, y2, color));
                }
                Shape::Text { at: pos, text, .. } => {
                    let (x, y) = at(*pos);
                    ctx.print(x, y, text.clone());
                }
                Shape::Sphere { center, radius } => {
                    let (x, y) = at(*center);
                    ctx.draw(&Circle { x, y, radius: radius * scale, color: Color::Blue });
                }
                Shape::Legend(_) => {}
            }
        }
        ctx.layer();
    }
}

fn outline(ctx: &mut Context, ring: &LineString<f64>, color: Color, at: &impl Fn(Coord<f64>) -> (f64, f64)) {
    for segment in ring.lines() {
        let ((x1, y1), (x2, y2)) = (at(segment.start), at(segment.end));
        ctx.draw(&Line::new(x1, y1, x2, y2, color));
    }
}

/// Draws only the part of an arc its dash offset has revealed so far.
fn draw_dashed(ctx: &mut Context, curve: &Curve, node: &Node, color: Color, at: &impl Fn(Coord<f64>) -> (f64, f64)) {
    let total = node.number(Property::DashArray).unwrap_or(0.0);
    let hidden = node.number(Property::DashOffset).unwrap_or(0.0);
    let mut budget = if total > 0.0 { total - hidden } else { f64::INFINITY };

    for line in curve.flatten().iter().flat_map(|ls| ls.lines()) {
        if budget <= 0.0 {
            break;
        }
        let length = line.dx().hypot(line.dy());
        let end = if length > budget {
            let t = budget / length;
            Coord { x: line.start.x + line.dx() * t, y: line.start.y + line.dy() * t }
        } else {
            line.end
        };
        budget -= length;
        let ((x1, y1), (x2, y2)) = (at(line.start), at(end));
        ctx.draw(&Line::new(x1, y1, x2, y2, color));
    }
}

fn legend_lines(map: &AtlasMap<RetainedScene>) -> Vec<TextLine<'static>> {
    let scene = map.scene();
    let legend: Option<&Legend> = map
        .overlay_layer("legend")
        .and_then(|layer| scene.nodes(layer).into_iter().next())
        .and_then(|id| scene.node(id))
        .and_then(|node| match &node.shape {
            Shape::Legend(legend) => Some(legend),
            _ => None,
        });
    let Some(legend) = legend else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    if let Some(title) = &legend.title {
        lines.push(TextLine::from(title.clone()));
    }
    for entry in &legend.entries {
        let color = Color::from_str(&entry.color).unwrap_or(Color::White);
        lines.push(TextLine::from(vec![
            Span::styled("██ ", Style::default().fg(color)),
            Span::raw(entry.label.clone()),
        ]));
    }
    lines
}
