use crate::error::UploadError;
use crate::picker::{PickerEvent, UvPicker};
use crate::upload::{UploadFile, UploadReceipt, Uploader};
use crate::zone::{LayerKind, LogoRef, PercentPos, ZoneConfigs};
use std::sync::mpsc::{self, Receiver, Sender};

/// Editing state behind the interactive shell: the zone configuration store,
/// the picker and the channel it reports through.
pub struct ConfiguratorSession {
    zones: ZoneConfigs,
    model_id: String,
    selected_zone: String,
    picker: UvPicker,
    picker_tx: Sender<PickerEvent>,
    picker_rx: Receiver<PickerEvent>,
    uploader: Option<Box<dyn Uploader>>,
}

impl ConfiguratorSession {
    pub fn new(zones: ZoneConfigs, model_id: impl Into<String>) -> Self {
        let (picker_tx, picker_rx) = mpsc::channel();
        let selected_zone = zones.zone_ids().next().unwrap_or("front").to_string();
        Self {
            zones,
            model_id: model_id.into(),
            selected_zone,
            picker: UvPicker::new(),
            picker_tx,
            picker_rx,
            uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Box<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn zones(&self) -> &ZoneConfigs {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut ZoneConfigs {
        &mut self.zones
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn selected_zone(&self) -> &str {
        &self.selected_zone
    }

    pub fn select_zone(&mut self, zone_id: impl Into<String>) {
        self.selected_zone = zone_id.into();
    }

    pub fn picker(&self) -> &UvPicker {
        &self.picker
    }

    pub fn picker_mut(&mut self) -> &mut UvPicker {
        &mut self.picker
    }

    /// Returns whether the picker is enabled afterwards.
    pub fn toggle_picker(&mut self) -> bool {
        if self.picker.is_enabled() {
            self.picker.disable();
            log::info!("UV picker disabled");
        } else {
            self.picker.enable(self.picker_tx.clone());
            log::info!("UV picker enabled");
        }
        self.picker.is_enabled()
    }

    /// Layer a placement applies to: the number when the zone has one, else its text.
    pub fn active_layer(&self, zone_id: &str) -> Option<LayerKind> {
        let zone = self.zones.get(zone_id)?;
        if zone.number.is_some() {
            Some(LayerKind::Number)
        } else if zone.text.is_some() {
            Some(LayerKind::Text)
        } else {
            None
        }
    }

    /// Applies every queued picker event. Returns true if the configuration changed.
    pub fn drain_picker_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.picker_rx.try_recv() {
            changed |= self.apply_picker_event(event);
        }
        changed
    }

    fn apply_picker_event(&mut self, event: PickerEvent) -> bool {
        match event {
            PickerEvent::Place { zone_id, position } => {
                self.selected_zone = zone_id.clone();
                self.place_active_layer(&zone_id, position)
            }
            PickerEvent::Select { zone_id, .. } => {
                log::info!("selected zone '{zone_id}'");
                self.selected_zone = zone_id;
                false
            }
        }
    }

    fn place_active_layer(&mut self, zone_id: &str, position: PercentPos) -> bool {
        let Some(kind) = self.active_layer(zone_id) else {
            log::debug!("zone '{zone_id}' has no text or number to place");
            return false;
        };
        self.zones.place_layer(zone_id, kind, position)
    }

    /// Uploads `file` and uses it as the selected zone's logo.
    pub fn attach_logo(&mut self, file: UploadFile) -> Result<UploadReceipt, UploadError> {
        let uploader = self
            .uploader
            .as_mut()
            .ok_or_else(|| UploadError::Rejected("no upload destination configured".to_string()))?;
        let receipt = uploader.upload(file)?;
        self.zones.set_logo(&self.selected_zone, Some(LogoRef::Uploaded(receipt.url.clone())));
        Ok(receipt)
    }
}
