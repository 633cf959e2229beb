//! Widget layout and rendering.

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Cell, Gauge, Paragraph, Row, Sparkline, Table};
use ratatui::Frame;

use crate::frame::MemSnapshot;
use crate::source::StatSource;

use super::{AnySource, App};

pub(crate) fn draw(frame: &mut Frame, app: &App) {
    let [header, gauge, middle, chart, footer] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(8),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    draw_header(frame, header, app);
    draw_load_gauge(frame, gauge, app);

    let [threads, memory] =
        Layout::horizontal([Constraint::Percentage(55), Constraint::Percentage(45)]).areas(middle);
    draw_threads(frame, threads, app);
    draw_memory(frame, memory, app);
    draw_histogram(frame, chart, app);
    draw_footer(frame, footer, app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let meta = app.source().source().metadata();
    let line = Line::from(vec![
        Span::styled(
            format!("pid {} ", meta.pid),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "{} ({}) · {} cores @ {} Hz · ",
            meta.fex_version, meta.app_type, meta.hardware_concurrency, meta.cycle_counter_frequency
        )),
        Span::styled(app.status_line(), Style::default().fg(Color::Cyan)),
    ]);
    frame.render_widget(
        Paragraph::new(line).block(Block::bordered().title("fextop")),
        area,
    );
}

fn draw_load_gauge(frame: &mut Frame, area: Rect, app: &App) {
    let load = app.latest().map_or(0.0, |f| f.fex_load_percent);
    let gauge = Gauge::default()
        .block(Block::bordered().title("JIT load"))
        .gauge_style(Style::default().fg(load_colour(load)))
        .ratio((load / 100.0).clamp(0.0, 1.0))
        .label(format!("{load:.1}%"));
    frame.render_widget(gauge, area);
}

fn draw_threads(frame: &mut Frame, area: Rect, app: &App) {
    let rows: Vec<Row> = app
        .latest()
        .map(|f| f.thread_loads.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|load| {
            let shown = load.load_percent.min(100.0);
            Row::new(vec![
                Cell::from(load.tid.to_string()),
                Cell::from(format!("{shown:6.1}%")),
                Cell::from(load.total_cycles.to_string()),
            ])
        })
        .collect();

    let threads_sampled = app.latest().map_or(0, |f| f.threads_sampled);
    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(9),
            Constraint::Min(12),
        ],
    )
    .header(
        Row::new(vec!["tid", "load", "cycles"]).style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::bordered().title(format!("threads ({threads_sampled} sampled)")));
    frame.render_widget(table, area);
}

fn draw_memory(frame: &mut Frame, area: Rect, app: &App) {
    let lines = match app.latest().and_then(|f| f.mem.as_ref()) {
        Some(mem) => memory_lines(mem),
        None => vec![Line::from("waiting for first memory sample…")],
    };
    frame.render_widget(
        Paragraph::new(lines).block(Block::bordered().title("resident memory")),
        area,
    );
}

fn memory_lines(mem: &MemSnapshot) -> Vec<Line<'static>> {
    let entry = |name: &str, bytes: u64| {
        Line::from(vec![
            Span::raw(format!("{name:<16}")),
            Span::styled(fmt_bytes(bytes), Style::default().fg(Color::Green)),
        ])
    };
    let mut lines = vec![
        entry("total", mem.total_anon),
        entry("jit code", mem.jit_code),
        entry("op dispatcher", mem.op_dispatcher),
        entry("frontend", mem.frontend),
        entry("cpu backend", mem.cpu_backend),
        entry("lookup", mem.lookup),
        entry("lookup l1", mem.lookup_l1),
        entry("thread states", mem.thread_states),
        entry("block links", mem.block_links),
        entry("misc", mem.misc),
        entry("allocator", mem.allocator),
        entry("unaccounted", mem.unaccounted),
    ];
    if mem.largest_anon.size > 0 {
        lines.push(Line::from(format!(
            "largest anon    {:#x}-{:#x} ({})",
            mem.largest_anon.begin,
            mem.largest_anon.end,
            fmt_bytes(mem.largest_anon.size)
        )));
    }
    lines
}

fn draw_histogram(frame: &mut Frame, area: Rect, app: &App) {
    let histogram = app.source().source().histogram();
    let width = area.width.saturating_sub(2) as usize;
    let data: Vec<u64> = histogram
        .iter()
        .map(|entry| entry.load_percent.clamp(0.0, 100.0) as u64)
        .collect();
    // Newest entries on the right edge.
    let visible = &data[data.len().saturating_sub(width)..];

    let mut title = String::from("load history");
    let mut style = Style::default().fg(Color::Cyan);
    if let Some(newest) = histogram.newest() {
        let mut flags = Vec::new();
        if newest.high_jit_load {
            flags.push("jit");
        }
        if newest.high_invalidation {
            flags.push("smc");
        }
        if newest.high_sigbus {
            flags.push("sigbus");
        }
        if newest.high_softfloat {
            flags.push("softfloat");
        }
        if !flags.is_empty() {
            title = format!("load history · high: {}", flags.join(", "));
            style = Style::default().fg(Color::Red);
        }
    }

    let sparkline = Sparkline::default()
        .block(Block::bordered().title(title))
        .style(style)
        .max(100)
        .data(visible.iter().copied());
    frame.render_widget(sparkline, area);
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let hints = match app.source() {
        AnySource::Live(_) => " q quit",
        AnySource::Replay(_) => " q quit · space pause · ←/→ step · home rewind · +/- speed",
    };
    frame.render_widget(
        Paragraph::new(hints).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}

fn load_colour(load: f64) -> Color {
    if load >= 100.0 {
        Color::Red
    } else if load >= 50.0 {
        Color::Yellow
    } else {
        Color::Green
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
