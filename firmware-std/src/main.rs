//! Probelog — ESP-IDF std firmware
//!
//! Thread-based binary around the `probelog` capture core. This side
//! owns the hardware: the WiFi radio in promiscuous mode, the SD card
//! the capture files land on, the SSD1306 status panel, and the
//! optional BQ27441 fuel gauge. The capture session itself (queue,
//! worker, leaderboard, persistence) lives in the library and only sees
//! these through its radio/display/battery seams.

mod battery;
mod display;

use std::path::Path;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Local;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::fs::fatfs::Fatfs;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::sd::{spi::SdSpiHostDriver, SdCardConfiguration, SdCardDriver};
use esp_idf_svc::hal::spi::{config::DriverConfig, Dma, SpiDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::io::vfs::MountedFatfs;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::{EspSntp, SntpConf, SyncStatus, SNTP_SERVER_NUM};
use esp_idf_svc::sys::{
    esp, esp_wifi_set_channel, esp_wifi_set_promiscuous, esp_wifi_set_promiscuous_filter,
    esp_wifi_set_promiscuous_rx_cb, settimeofday, timeval, tzset, wifi_promiscuous_filter_t,
    wifi_promiscuous_pkt_t, wifi_promiscuous_pkt_type_t, wifi_second_chan_t_WIFI_SECOND_CHAN_NONE,
    EspError, WIFI_PROMIS_FILTER_MASK_MGMT,
};
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

use probelog::error::Error;
use probelog::filter::FrameRx;
use probelog::pcap::PcapFile;
use probelog::session::{
    BatteryGauge, PromiscuousRadio, SessionIo, Sniffer, SnifferConfig, StatusDisplay,
};
use probelog::settings::{Settings, SETTINGS_FILE};

use battery::{Bq27441, SharedGauge};
use display::{ChannelDisplay, TEXT_QUEUE_DEPTH};

// ── Board wiring ─────────────────────────────────────────────────────

const SD_MOUNT_POINT: &str = "/sdcard";
const SD_MAX_OPEN_FILES: usize = 4;

/// 802.11 channel the sniffer parks on.
const SNIFFER_CHANNEL: u8 = 1;

/// Capture file rotation period.
const ROTATE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Fallback clock when SNTP is unreachable: 2025-01-01 00:00:00 UTC.
const DEFAULT_EPOCH: u64 = 1_735_693_200;

const NTP_SERVER: &str = "time.google.com";
const SNTP_RETRIES: u32 = 5;
const SNTP_RETRY_DELAY: Duration = Duration::from_secs(3);

/// POSIX TZ rule applied after the clock is set.
const TIMEZONE: &str = "CET-1CEST,M3.5.0,M10.5.0/3";

// ── Radio tap slot (for the WiFi promisc callback) ───────────────────

static TAP: Mutex<Option<FrameRx>> = Mutex::new(None);

/// WiFi promiscuous mode callback.
///
/// Runs in the WiFi driver task context (not ISR on ESP-IDF, but still
/// must be non-blocking). Hands the raw frame to the session tap; the
/// tap classifies it and pushes onto the bounded queue.
unsafe extern "C" fn promisc_rx_cb(
    buf: *mut std::ffi::c_void,
    _pkt_type: wifi_promiscuous_pkt_type_t,
) {
    let pkt = unsafe { &*(buf as *const wifi_promiscuous_pkt_t) };
    let rssi = pkt.rx_ctrl.rssi() as i8;
    let sig_len = pkt.rx_ctrl.sig_len() as usize;

    if sig_len == 0 {
        return;
    }

    // Safety: payload is `sig_len` bytes starting at pkt.payload
    let payload = unsafe { std::slice::from_raw_parts(pkt.payload.as_ptr(), sig_len) };

    if let Ok(guard) = TAP.lock() {
        if let Some(ref tap) = *guard {
            tap.frame_received(payload, rssi);
        }
    }
}

// ── Radio seam ───────────────────────────────────────────────────────

/// ESP32 promiscuous radio. Expects `esp_wifi` to be started (station
/// mode is fine) before the first `enable`.
struct EspRadio;

impl EspRadio {
    fn configure(channel: u8) -> Result<(), EspError> {
        let filter = wifi_promiscuous_filter_t {
            filter_mask: WIFI_PROMIS_FILTER_MASK_MGMT,
        };
        unsafe {
            esp!(esp_wifi_set_promiscuous_filter(&filter))?;
            esp!(esp_wifi_set_promiscuous_rx_cb(Some(promisc_rx_cb)))?;
            esp!(esp_wifi_set_promiscuous(true))?;
            esp!(esp_wifi_set_channel(
                channel,
                wifi_second_chan_t_WIFI_SECOND_CHAN_NONE
            ))?;
        }
        Ok(())
    }
}

impl PromiscuousRadio for EspRadio {
    fn enable(&mut self, channel: u8, tap: FrameRx) -> probelog::error::Result<()> {
        if let Ok(mut slot) = TAP.lock() {
            *slot = Some(tap);
        }
        if let Err(e) = Self::configure(channel) {
            self.disable();
            return Err(Error::Radio(e.to_string()));
        }
        log::info!("promiscuous mode enabled on channel {channel}");
        Ok(())
    }

    fn disable(&mut self) {
        unsafe {
            if let Err(e) = esp!(esp_wifi_set_promiscuous(false)) {
                log::error!("disabling promiscuous mode failed: {e}");
            }
        }
        if let Ok(mut slot) = TAP.lock() {
            *slot = None;
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("Probelog v{} starting (std)", probelog::VERSION);

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // ── SD card (SPI) ────────────────────────────────────────────────

    let spi_driver = SpiDriver::new(
        peripherals.spi2,
        peripherals.pins.gpio14,
        peripherals.pins.gpio13,
        Some(peripherals.pins.gpio12),
        &DriverConfig::default().dma(Dma::Auto(4096)),
    )?;

    let sd_card_driver = SdCardDriver::new_spi(
        SdSpiHostDriver::new(
            spi_driver,
            Some(peripherals.pins.gpio15),
            AnyIOPin::none(),
            AnyIOPin::none(),
            AnyIOPin::none(),
            #[cfg(not(any(
                esp_idf_version_major = "4",
                all(esp_idf_version_major = "5", esp_idf_version_minor = "0"),
                all(esp_idf_version_major = "5", esp_idf_version_minor = "1"),
            )))]
            None,
        )?,
        &SdCardConfiguration::new(),
    )?;

    // Keep the mount alive for the life of the process
    let _mounted_fatfs = MountedFatfs::mount(
        Fatfs::new_sdcard(0, sd_card_driver)?,
        SD_MOUNT_POINT,
        SD_MAX_OPEN_FILES,
    )?;
    log::info!("SD card mounted at {SD_MOUNT_POINT}");

    let sd_root = Path::new(SD_MOUNT_POINT);
    let settings = Settings::load_or_create(&sd_root.join(SETTINGS_FILE))?;

    // ── Display thread ───────────────────────────────────────────────

    let (page_tx, page_rx) = mpsc::sync_channel::<String>(TEXT_QUEUE_DEPTH);
    {
        let i2c = peripherals.i2c0;
        let sda = peripherals.pins.gpio21;
        let scl = peripherals.pins.gpio22;
        let flip = settings.current_rotation;
        thread::Builder::new()
            .name("display".into())
            .stack_size(4096)
            .spawn(move || {
                display::display_thread(i2c, sda, scl, page_rx, flip);
            })?;
        log::info!("Display thread spawned");
    }

    let display = ChannelDisplay::new(page_tx);
    display.push_text("Initializing...");

    // ── Battery gauge (second I2C bus) ───────────────────────────────

    let battery = {
        let config = I2cConfig::new().baudrate(Hertz(50_000));
        match I2cDriver::new(
            peripherals.i2c1,
            peripherals.pins.gpio32,
            peripherals.pins.gpio33,
            &config,
        ) {
            Ok(i2c) => Bq27441::detect(i2c).map(SharedGauge::new),
            Err(e) => {
                log::warn!("battery I2C bus init failed: {e}");
                None
            }
        }
    };

    // ── WiFi + clock ─────────────────────────────────────────────────

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    wifi.set_configuration(&Configuration::Client(Default::default()))?;
    wifi.start()?;
    log::info!("WiFi started (station mode)");

    if let Err(e) = obtain_time(&mut wifi, &settings, &display) {
        log::warn!("time sync failed: {e:#}");
    }
    if !clock_is_set() {
        log::warn!("clock not set, falling back to the default epoch");
        set_default_time();
    }

    std::env::set_var("TZ", TIMEZONE);
    unsafe { tzset() };
    log::info!("local time: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

    // ── Capture pipeline ─────────────────────────────────────────────

    let config = SnifferConfig {
        refresh_interval: settings.short_period(),
        show_battery: settings.display_battery_data,
        reduced_log: sd_root.join("reduced.log"),
        battery_log: battery.as_ref().map(|_| sd_root.join("battery.csv")),
        ..Default::default()
    };
    let mut sniffer = Sniffer::new(EspRadio, config);

    let capture = PcapFile::next_in_dir(sd_root)?;
    log::info!("capturing to {}", capture.path().display());
    sniffer.start(SNIFFER_CHANNEL, session_io(capture, &display, &battery))?;
    display.push_text("Sniffing...");

    // ── Rotation loop ────────────────────────────────────────────────

    loop {
        thread::sleep(ROTATE_AFTER);

        log::info!("rotating capture file: {}", sniffer.stats());
        sniffer.stop()?;

        let capture = PcapFile::next_in_dir(sd_root)?;
        log::info!("capturing to {}", capture.path().display());
        sniffer.start(SNIFFER_CHANNEL, session_io(capture, &display, &battery))?;
    }
}

/// Bundle the per-session collaborators. The display sender and gauge
/// handle are cloned per session; the capture file is consumed.
fn session_io(
    capture: PcapFile,
    display: &ChannelDisplay,
    battery: &Option<SharedGauge>,
) -> SessionIo {
    SessionIo {
        capture: Box::new(capture),
        display: Box::new(display.clone()),
        battery: battery
            .clone()
            .map(|gauge| Box::new(gauge) as Box<dyn BatteryGauge + Send>),
    }
}

// ── Clock ────────────────────────────────────────────────────────────

/// Join the configured station network and wait for SNTP to complete.
/// The association is only needed for the sync; the radio goes back to
/// unassociated station mode either way.
fn obtain_time(
    wifi: &mut BlockingWifi<EspWifi<'static>>,
    settings: &Settings,
    display: &ChannelDisplay,
) -> anyhow::Result<()> {
    if settings.wifi_ssid.is_empty() {
        anyhow::bail!("no station credentials in settings");
    }

    let auth_method = if settings.wifi_password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: settings
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("station SSID too long"))?,
        password: settings
            .wifi_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("station password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    display.push_text("Getting time...");
    wifi.connect()?;
    wifi.wait_netif_up()?;
    log::info!("connected to {}", settings.wifi_ssid);

    let sntp = EspSntp::new(&SntpConf {
        servers: [NTP_SERVER; SNTP_SERVER_NUM],
        ..Default::default()
    })?;

    let mut synced = false;
    for _ in 0..SNTP_RETRIES {
        if sntp.get_sync_status() == SyncStatus::Completed {
            synced = true;
            break;
        }
        thread::sleep(SNTP_RETRY_DELAY);
    }

    if let Err(e) = wifi.disconnect() {
        log::warn!("wifi disconnect failed: {e}");
    }

    if synced {
        log::info!("clock synchronized via {NTP_SERVER}");
        Ok(())
    } else {
        anyhow::bail!("SNTP incomplete after {SNTP_RETRIES} attempts")
    }
}

/// Newlib boots at the 1970 epoch; anything past late 2023 means SNTP
/// (this boot or a previous one with a backup battery) set the clock.
fn clock_is_set() -> bool {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() > 1_700_000_000)
        .unwrap_or(false)
}

fn set_default_time() {
    let tv = timeval {
        tv_sec: DEFAULT_EPOCH as _,
        tv_usec: 0,
    };
    unsafe {
        settimeofday(&tv, std::ptr::null());
    }
}
