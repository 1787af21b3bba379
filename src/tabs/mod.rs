//! Browser tab directory.
//!
//! The daemon never talks to a browser directly. A thin browser shim reports
//! tab navigation and closure through the local API; this registry keeps the
//! latest known state of every tab and turns those reports into `TabEvent`s
//! for the background context.

pub mod screenshot;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

pub use screenshot::ScreenshotCommand;

pub type TabId = u32;

/// Token naming the audio stream of one tab, handed to the capture host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTarget(pub String);

impl CaptureTarget {
    /// Any system monitor source, used when the shim did not name one.
    pub const DEFAULT_MONITOR: &'static str = "monitor";

    pub fn default_monitor() -> Self {
        Self(Self::DEFAULT_MONITOR.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    pub title: Option<String>,
    pub capture_target: Option<CaptureTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabEvent {
    /// The tab finished loading a URL (new navigation or title change).
    Updated(TabInfo),
    Closed(TabId),
}

/// What the orchestrator and scheduler need to know about tabs.
#[async_trait]
pub trait TabDirectory: Send + Sync {
    async fn get(&self, tab: TabId) -> Option<TabInfo>;

    /// Open tabs, most recently updated first.
    async fn recent(&self) -> Vec<TabInfo>;

    async fn capture_target(&self, tab: TabId) -> Result<CaptureTarget>;

    /// Capture the visible content of a tab as encoded image bytes.
    async fn capture_visible(&self, tab: TabId) -> Result<Vec<u8>>;
}

#[derive(Default)]
struct TabTable {
    tabs: HashMap<TabId, TabInfo>,
    /// Tab ids, most recently updated last.
    order: Vec<TabId>,
}

/// In-memory tab registry fed by the local API.
#[derive(Clone)]
pub struct RegisteredTabs {
    table: Arc<RwLock<TabTable>>,
    events: mpsc::UnboundedSender<TabEvent>,
    screenshot: ScreenshotCommand,
}

impl RegisteredTabs {
    pub fn new(screenshot: ScreenshotCommand) -> (Self, mpsc::UnboundedReceiver<TabEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                table: Arc::new(RwLock::new(TabTable::default())),
                events,
                screenshot,
            },
            rx,
        )
    }

    pub async fn update(&self, info: TabInfo) {
        debug!("Tab {} updated: {}", info.id, info.url);
        {
            let mut table = self.table.write().await;
            table.order.retain(|id| *id != info.id);
            table.order.push(info.id);
            table.tabs.insert(info.id, info.clone());
        }
        let _ = self.events.send(TabEvent::Updated(info));
    }

    pub async fn close(&self, tab: TabId) -> bool {
        let existed = {
            let mut table = self.table.write().await;
            table.order.retain(|id| *id != tab);
            table.tabs.remove(&tab).is_some()
        };
        debug!("Tab {} closed (known: {})", tab, existed);
        let _ = self.events.send(TabEvent::Closed(tab));
        existed
    }

    pub async fn list(&self) -> Vec<TabInfo> {
        let mut tabs: Vec<TabInfo> = self.table.read().await.tabs.values().cloned().collect();
        tabs.sort_by_key(|tab| tab.id);
        tabs
    }
}

#[async_trait]
impl TabDirectory for RegisteredTabs {
    async fn get(&self, tab: TabId) -> Option<TabInfo> {
        self.table.read().await.tabs.get(&tab).cloned()
    }

    async fn recent(&self) -> Vec<TabInfo> {
        let table = self.table.read().await;
        table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.tabs.get(id).cloned())
            .collect()
    }

    async fn capture_target(&self, tab: TabId) -> Result<CaptureTarget> {
        let table = self.table.read().await;
        let info = table
            .tabs
            .get(&tab)
            .ok_or_else(|| anyhow!("Tab {} is not known", tab))?;
        Ok(info
            .capture_target
            .clone()
            .unwrap_or_else(CaptureTarget::default_monitor))
    }

    async fn capture_visible(&self, tab: TabId) -> Result<Vec<u8>> {
        if self.get(tab).await.is_none() {
            return Err(anyhow!("Tab {} is not known", tab));
        }
        self.screenshot.capture().await
    }
}
