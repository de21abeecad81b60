use crate::app::{App, AppView, Panel, RateView};
use crate::settings::SettingsField;
use crate::speedtest::sampler::format_byte_rate;
use crate::speedtest::TestPhase;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

const ACCENT: Color = Color::Rgb(100, 149, 237);
const SUCCESS: Color = Color::Rgb(134, 194, 156);
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);
const WARN_DIM: Color = Color::Rgb(130, 110, 80);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    match app.view {
        AppView::Main => {
            let chunks = Layout::vertical([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(1),
            ])
            .split(area);

            draw_header(frame, chunks[0], app);
            if app.expanded {
                draw_expanded_view(frame, chunks[1], app);
            } else {
                draw_normal_view(frame, chunks[1], app);
            }
            draw_help(frame, chunks[2], app);
        }
        AppView::Settings => draw_settings_view(frame, area, app),
    }
}

fn draw_normal_view(frame: &mut Frame, area: Rect, app: &App) {
    let panels = Layout::horizontal([
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
    ])
    .split(area);

    draw_panel(frame, panels[0], app, Panel::Download, app.selected_panel == Panel::Download, false);
    draw_panel(frame, panels[1], app, Panel::Upload, app.selected_panel == Panel::Upload, false);
    draw_panel(frame, panels[2], app, Panel::Ping, app.selected_panel == Panel::Ping, false);
}

fn draw_expanded_view(frame: &mut Frame, area: Rect, app: &App) {
    draw_panel(frame, area, app, app.selected_panel, true, true);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(inner);

    let title = Paragraph::new("netgauge")
        .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD));
    frame.render_widget(title, chunks[0]);

    let (status, color) = match app.phase {
        TestPhase::Idle if app.completed => ("Complete", ACCENT),
        TestPhase::Idle => ("Ready", TEXT_MUTED),
        TestPhase::Ping => ("Measuring latency...", WARN),
        TestPhase::Download => ("Testing download...", SUCCESS),
        TestPhase::Upload => ("Testing upload...", INFO),
    };

    frame.render_widget(
        Paragraph::new(status)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        chunks[1],
    );

    frame.render_widget(
        Paragraph::new(create_phase_text(app)).alignment(Alignment::Right),
        chunks[2],
    );
}

fn create_phase_text(app: &App) -> Line<'static> {
    let phases = [
        (TestPhase::Ping, "ping"),
        (TestPhase::Download, "down"),
        (TestPhase::Upload, "up"),
    ];

    let mut spans = Vec::new();

    for (i, (p, label)) in phases.iter().enumerate() {
        let style = if app.phase == *p {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if app.phase_progress(*p) >= 1.0 {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };

        spans.push(Span::styled(*label, style));

        if i < phases.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }

    Line::from(spans)
}

struct PanelData<'a> {
    title: &'static str,
    color: Color,
    dim_color: Color,
    value: String,
    detail: String,
    progress: f64,
    samples: &'a [f64],
    latency: bool,
}

fn panel_data(app: &App, panel: Panel) -> PanelData<'_> {
    match panel {
        Panel::Download => rate_panel("Download", SUCCESS, SUCCESS_DIM, &app.download, app.phase_progress(TestPhase::Download)),
        Panel::Upload => rate_panel("Upload", INFO, INFO_DIM, &app.upload, app.phase_progress(TestPhase::Upload)),
        Panel::Ping => PanelData {
            title: "Latency",
            color: WARN,
            dim_color: WARN_DIM,
            value: app
                .ping_ms
                .map(|ms| format!("{:.2} ms", ms))
                .unwrap_or_else(|| "—".to_string()),
            detail: format!("{} probes", app.ping_samples.len()),
            progress: app.phase_progress(TestPhase::Ping),
            samples: &app.ping_samples,
            latency: true,
        },
    }
}

fn rate_panel<'a>(
    title: &'static str,
    color: Color,
    dim_color: Color,
    rate: &'a RateView,
    progress: f64,
) -> PanelData<'a> {
    PanelData {
        title,
        color,
        dim_color,
        value: rate.formatted.clone().unwrap_or_else(|| "—".to_string()),
        detail: rate.bit_formatted.clone().unwrap_or_default(),
        progress,
        samples: &rate.series,
        latency: false,
    }
}

fn draw_panel(frame: &mut Frame, area: Rect, app: &App, panel: Panel, selected: bool, expanded: bool) {
    let data = panel_data(app, panel);
    let border_color = if selected { BORDER_ACTIVE } else { BORDER };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Span::styled(
            format!(" {} ", data.title),
            Style::default().fg(if selected { data.color } else { TEXT_SECONDARY }),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new(data.value)
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    let detail = if expanded {
        let (avg, max, min) = get_stats(data.samples);
        let fmt = |v: f64| {
            if data.latency {
                format!("{:.2} ms", v)
            } else {
                format_byte_rate(v as u64, app.settings.display)
            }
        };
        format!("{}  ·  avg {}  ·  max {}  ·  min {}", data.detail, fmt(avg), fmt(max), fmt(min))
    } else {
        data.detail
    };
    frame.render_widget(
        Paragraph::new(detail)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[1],
    );

    draw_progress_bar(frame, chunks[2], data.progress, data.color, data.dim_color);

    if expanded {
        draw_detailed_chart(frame, chunks[3], data.samples, data.color);
    } else if !data.samples.is_empty() {
        draw_sparkline(frame, chunks[3], data.samples, data.color);
    }
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio * width as f64) as usize).min(width);
    let empty = width.saturating_sub(filled);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

fn draw_sparkline(frame: &mut Frame, area: Rect, data: &[f64], color: Color) {
    if data.is_empty() || area.width < 4 || area.height < 2 {
        return;
    }

    let (min_val, max_val) = get_data_range(data);
    let range = (max_val - min_val).max(1.0);

    let points: Vec<(f64, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .x_axis(Axis::default().bounds([0.0, data.len() as f64]))
        .y_axis(Axis::default().bounds([min_val - range * 0.1, max_val + range * 0.1]));

    frame.render_widget(chart, area);
}

fn draw_detailed_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color) {
    if data.is_empty() || area.width < 10 || area.height < 3 {
        return;
    }

    let (min_val, max_val) = get_data_range(data);
    let range = (max_val - min_val).max(0.1);
    let y_min = (min_val - range * 0.1).max(0.0);
    let y_max = max_val + range * 0.1;

    let points: Vec<(f64, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let (avg, _, _) = get_stats(data);
    let avg_line: Vec<(f64, f64)> = vec![(0.0, avg), (data.len() as f64, avg)];

    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(color))
            .data(&points),
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(TEXT_MUTED))
            .data(&avg_line),
    ];

    let chart = Chart::new(datasets)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([0.0, data.len() as f64]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([y_min, y_max]),
        );

    frame.render_widget(chart, area);
}

fn draw_settings_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(area);

    let header_block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let header_inner = header_block.inner(chunks[0]);
    frame.render_widget(header_block, chunks[0]);

    frame.render_widget(
        Paragraph::new(format!("Settings  ·  {}", app.settings.server))
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        header_inner,
    );

    let content_area = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .split(chunks[1])[1];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content_area);
    frame.render_widget(block, content_area);

    let rows = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Min(0),
    ])
    .split(inner);

    let settings = &app.settings;
    let entries = [
        (SettingsField::DownloadWorkers, "Download workers", settings.download_workers.to_string()),
        (SettingsField::UploadWorkers, "Upload workers", settings.upload_workers.to_string()),
        (SettingsField::DownloadDuration, "Download time", format!("{} s", settings.download_secs)),
        (SettingsField::UploadDuration, "Upload time", format!("{} s", settings.upload_secs)),
        (SettingsField::Display, "Units", settings.display.label().to_string()),
    ];

    for (row, (field, label, value)) in entries.iter().enumerate() {
        draw_setting_row(frame, rows[row], label, value, app.selected_setting == *field);
    }

    frame.render_widget(
        Paragraph::new("↑↓ select · ←→ adjust · enter done")
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let chunks = Layout::horizontal([
        Constraint::Length(18),
        Constraint::Min(10),
    ])
    .split(area);

    let label_style = if selected {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(TEXT_SECONDARY)
    };

    frame.render_widget(
        Paragraph::new(format!(" {}", label)).style(label_style),
        chunks[0],
    );

    let value_text = if selected {
        format!("< {} >", value)
    } else {
        value.to_string()
    };

    let value_style = if selected {
        Style::default().fg(TEXT_PRIMARY)
    } else {
        Style::default().fg(TEXT_MUTED)
    };

    frame.render_widget(Paragraph::new(value_text).style(value_style), chunks[1]);
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.expanded {
        "esc close · q quit"
    } else if app.start_enabled {
        "enter start · s settings · tab select · space expand · q quit"
    } else {
        "tab select · space expand · esc cancel · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

fn get_data_range(data: &[f64]) -> (f64, f64) {
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    (if min == f64::MAX { 0.0 } else { min }, if max == f64::MIN { 0.0 } else { max })
}

fn get_stats(data: &[f64]) -> (f64, f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let (min, max) = get_data_range(data);
    (avg, max, min)
}
