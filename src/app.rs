use crate::settings::{Settings, SettingsField};
use crate::speedtest::sampler::RateUpdate;
use crate::speedtest::{Direction, TestPhase, TestUpdate};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

/// Latest displayed figures for one direction.
#[derive(Debug, Clone, Default)]
pub struct RateView {
    pub formatted: Option<String>,
    pub bit_formatted: Option<String>,
    pub series: Vec<f64>,
}

impl RateView {
    fn apply(&mut self, update: RateUpdate) {
        self.formatted = Some(update.formatted);
        self.bit_formatted = Some(update.bit_formatted);
        self.series = update.series.into_iter().map(|v| v as f64).collect();
    }
}

pub struct App {
    pub phase: TestPhase,
    pub should_quit: bool,
    pub start_enabled: bool,
    pub cancel_enabled: bool,
    /// Set once a run has reached Idle on its own.
    pub completed: bool,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,

    // Settings
    pub settings: Settings,
    pub selected_setting: SettingsField,

    pub phase_started: Option<Instant>,
    pub download: RateView,
    pub upload: RateView,
    pub ping_ms: Option<f64>,
    pub ping_samples: Vec<f64>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            phase: TestPhase::Idle,
            should_quit: false,
            start_enabled: true,
            cancel_enabled: false,
            completed: false,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            settings,
            selected_setting: SettingsField::DownloadWorkers,
            phase_started: None,
            download: RateView::default(),
            upload: RateView::default(),
            ping_ms: None,
            ping_samples: Vec::new(),
        }
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') => {
                if self.start_enabled {
                    self.view = AppView::Settings;
                }
                None
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.start_enabled {
                    Some(AppAction::StartTest)
                } else {
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.cancel_enabled {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.view = AppView::Main;
                Some(AppAction::ApplySettings)
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
                None
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
                None
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.decrease_setting();
                None
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.increase_setting();
                None
            }
            _ => None,
        }
    }

    fn increase_setting(&mut self) {
        match self.selected_setting {
            SettingsField::DownloadWorkers => {
                self.settings.download_workers = (self.settings.download_workers + 1).min(16);
            }
            SettingsField::UploadWorkers => {
                self.settings.upload_workers = (self.settings.upload_workers + 1).min(16);
            }
            SettingsField::DownloadDuration => {
                self.settings.download_secs = (self.settings.download_secs + 5).min(60);
            }
            SettingsField::UploadDuration => {
                self.settings.upload_secs = (self.settings.upload_secs + 5).min(60);
            }
            SettingsField::Display => self.settings.display = self.settings.display.toggle(),
        }
    }

    fn decrease_setting(&mut self) {
        match self.selected_setting {
            SettingsField::DownloadWorkers => {
                self.settings.download_workers = self.settings.download_workers.saturating_sub(1).max(1);
            }
            SettingsField::UploadWorkers => {
                self.settings.upload_workers = self.settings.upload_workers.saturating_sub(1).max(1);
            }
            SettingsField::DownloadDuration => {
                self.settings.download_secs = self.settings.download_secs.saturating_sub(5).max(5);
            }
            SettingsField::UploadDuration => {
                self.settings.upload_secs = self.settings.upload_secs.saturating_sub(5).max(5);
            }
            SettingsField::Display => self.settings.display = self.settings.display.toggle(),
        }
    }

    pub fn apply_update(&mut self, update: TestUpdate) {
        match update {
            TestUpdate::Controls {
                start_enabled,
                cancel_enabled,
            } => {
                self.start_enabled = start_enabled;
                self.cancel_enabled = cancel_enabled;
            }
            TestUpdate::Phase(phase) => {
                if phase == TestPhase::Idle && self.phase == TestPhase::Upload {
                    self.completed = true;
                }
                if phase != TestPhase::Idle {
                    self.completed = false;
                }
                self.phase = phase;
                self.phase_started = Some(Instant::now());
            }
            TestUpdate::Ping { mean_ms, samples } => {
                self.ping_ms = Some(mean_ms);
                self.ping_samples = samples;
            }
            TestUpdate::Rate(update) => match update.direction {
                Direction::Download => self.download.apply(update),
                Direction::Upload => self.upload.apply(update),
            },
            TestUpdate::Cleared => {
                self.download = RateView::default();
                self.upload = RateView::default();
                self.ping_ms = None;
                self.ping_samples.clear();
                self.expanded = false;
                self.completed = false;
            }
        }
    }

    /// Fraction of the current phase's fixed duration that has elapsed.
    pub fn phase_progress(&self, phase: TestPhase) -> f64 {
        let duration = match phase {
            TestPhase::Ping => self.settings.ping_interval(),
            TestPhase::Download => self.settings.download_interval(),
            TestPhase::Upload => self.settings.upload_interval(),
            TestPhase::Idle => return 0.0,
        };
        if self.phase == phase {
            let elapsed = self.phase_started.map(|t| t.elapsed()).unwrap_or_default();
            (elapsed.as_secs_f64() / duration.as_secs_f64().max(f64::EPSILON)).min(1.0)
        } else if self.is_past(phase) {
            1.0
        } else {
            0.0
        }
    }

    fn is_past(&self, phase: TestPhase) -> bool {
        let rank = |p: TestPhase| match p {
            TestPhase::Idle => 0,
            TestPhase::Ping => 1,
            TestPhase::Download => 2,
            TestPhase::Upload => 3,
        };
        self.completed || (self.phase != TestPhase::Idle && rank(self.phase) > rank(phase))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
    ApplySettings,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DisplayMode;
    use crossterm::event::{KeyEvent, KeyModifiers};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn controls_gate_start_and_cancel() {
        let mut app = App::new(Settings::default());
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), Some(AppAction::StartTest));

        app.apply_update(TestUpdate::Controls {
            start_enabled: false,
            cancel_enabled: true,
        });
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), None);
        assert!(app.expanded);
        app.expanded = false;
        assert_eq!(app.handle_key_event(press(KeyCode::Esc)), Some(AppAction::CancelTest));
    }

    #[test]
    fn settings_view_edits_and_applies() {
        let mut app = App::new(Settings::default());
        app.handle_key_event(press(KeyCode::Char('s')));
        assert_eq!(app.view, AppView::Settings);

        app.handle_key_event(press(KeyCode::Right));
        assert_eq!(app.settings.download_workers, 5);
        app.handle_key_event(press(KeyCode::Up));
        app.handle_key_event(press(KeyCode::Left));
        assert_eq!(app.settings.display, DisplayMode::Binary);

        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), Some(AppAction::ApplySettings));
        assert_eq!(app.view, AppView::Main);
    }

    #[test]
    fn completion_marks_every_phase_done() {
        let mut app = App::new(Settings::default());
        app.apply_update(TestUpdate::Phase(TestPhase::Upload));
        assert_eq!(app.phase_progress(TestPhase::Download), 1.0);
        app.apply_update(TestUpdate::Phase(TestPhase::Idle));
        assert!(app.completed);
        assert_eq!(app.phase_progress(TestPhase::Upload), 1.0);

        app.apply_update(TestUpdate::Cleared);
        app.apply_update(TestUpdate::Phase(TestPhase::Ping));
        assert!(!app.completed);
        assert_eq!(app.phase_progress(TestPhase::Download), 0.0);
    }
}
