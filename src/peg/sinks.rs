use std::{
    fs::{create_dir_all, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::types::{OrderBookSnapshot, StrategyState, WallPrices};
use crate::types::{PriceQuote, Side};

pub const WALL_SHIFTS_FILE: &str = "wall_shifts.csv";
pub const ORDERS_HISTORY_FILE: &str = "orders_history.csv";

const WALL_SHIFTS_HEADER: &str = "timestamp,source,crypto,price,currency,sellprice,buyprice,otherfeeds\n";
const ORDERS_HEADER: &str = "timestamp,state,active_sell,active_buy,total_active,sell_volume,buy_volume\n";

/// Fire-and-forget operator notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str);
}

/// Sends notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) {
        info!(target: "pegwall::notify", %title, %message);
    }
}

/// One row of the wall shift history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WallShiftRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub crypto: String,
    pub price: f64,
    pub currency: String,
    pub wall: WallPrices,
    pub quotes: Vec<PriceQuote>,
}

impl WallShiftRecord {
    pub fn csv_row(&self) -> String {
        let others = self
            .quotes
            .iter()
            .map(|q| format!("{}:{}", q.source, q.price))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{},{},{},{},{},{:.8},{:.8},{}\n",
            self.timestamp.to_rfc3339(),
            self.source,
            self.crypto,
            self.price,
            self.currency,
            self.wall.sell,
            self.wall.buy,
            others
        )
    }
}

/// One row of the per-cycle order history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrdersRecord {
    pub timestamp: DateTime<Utc>,
    pub state: StrategyState,
    pub active_sell: usize,
    pub active_buy: usize,
    pub total_active: usize,
    /// Order currency locked in sell orders.
    pub sell_volume: f64,
    /// Order currency wanted by buy orders.
    pub buy_volume: f64,
}

impl OrdersRecord {
    pub fn from_snapshot(state: StrategyState, book: &OrderBookSnapshot) -> Self {
        let volume = |side| book.side(side).map(|o| o.quantity).sum::<f64>();
        Self {
            timestamp: book.taken_at.unwrap_or_else(Utc::now),
            state,
            active_sell: book.active_sell,
            active_buy: book.active_buy,
            total_active: book.total_active,
            sell_volume: volume(Side::Sell),
            buy_volume: volume(Side::Buy),
        }
    }

    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{:.8},{:.8}\n",
            self.timestamp.to_rfc3339(),
            self.state,
            self.active_sell,
            self.active_buy,
            self.total_active,
            self.sell_volume,
            self.buy_volume
        )
    }
}

/// Append-only reporting of what the bot did.
pub trait ReportSink: Send + Sync {
    fn wall_shift(&self, record: &WallShiftRecord) -> io::Result<()>;
    fn orders_snapshot(&self, record: &OrdersRecord) -> io::Result<()>;
}

struct CsvFile {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    header: &'static str,
}

impl CsvFile {
    fn new(path: PathBuf, header: &'static str) -> Self {
        Self {
            writer: None,
            path,
            header,
        }
    }

    fn ensure_writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let fresh = file.metadata()?.len() == 0;
            let mut writer = BufWriter::new(file);
            if fresh {
                writer.write_all(self.header.as_bytes())?;
            }
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer unavailable"))
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        let writer = self.ensure_writer()?;
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }
}

/// Writes `wall_shifts.csv` and `orders_history.csv` under one directory.
pub struct CsvReportSink {
    wall_shifts: Mutex<CsvFile>,
    orders: Mutex<CsvFile>,
}

impl CsvReportSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            wall_shifts: Mutex::new(CsvFile::new(dir.join(WALL_SHIFTS_FILE), WALL_SHIFTS_HEADER)),
            orders: Mutex::new(CsvFile::new(dir.join(ORDERS_HISTORY_FILE), ORDERS_HEADER)),
        }
    }
}

fn append(file: &Mutex<CsvFile>, line: &str) -> io::Result<()> {
    let mut file = file
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "report file lock poisoned"))?;
    let result = file.append(line);
    if let Err(err) = &result {
        warn!(path = %file.path.display(), error = %err, "report write failed");
        file.writer = None;
    }
    result
}

impl ReportSink for CsvReportSink {
    fn wall_shift(&self, record: &WallShiftRecord) -> io::Result<()> {
        append(&self.wall_shifts, &record.csv_row())
    }

    fn orders_snapshot(&self, record: &OrdersRecord) -> io::Result<()> {
        append(&self.orders, &record.csv_row())
    }
}


#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::types::{Currency, CurrencyPair};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pegwall-{}-{}-{}",
            name,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn record() -> WallShiftRecord {
        let pair = CurrencyPair::new(Currency::crypto("btc"), Currency::fiat("usd"));
        WallShiftRecord {
            timestamp: Utc::now(),
            source: "main".into(),
            crypto: "btc".into(),
            price: 250.0,
            currency: "usd".into(),
            wall: WallPrices {
                sell: 0.004008,
                buy: 0.003992,
            },
            quotes: vec![
                PriceQuote::new("main", pair.clone(), 250.0),
                PriceQuote::new("backup", pair, 250.4),
            ],
        }
    }

    #[test]
    fn wall_shift_row_layout() {
        let row = record().csv_row();
        let fields: Vec<&str> = row.trim_end().split(',').collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[1], "main");
        assert_eq!(fields[5], "0.00400800");
        assert_eq!(fields[7], "main:250 backup:250.4");
    }

    #[test]
    fn csv_sink_writes_header_once() {
        let dir = temp_dir("csv");
        let sink = CsvReportSink::new(&dir);
        sink.wall_shift(&record()).unwrap();
        sink.wall_shift(&record()).unwrap();
        drop(sink);

        let sink = CsvReportSink::new(&dir);
        sink.wall_shift(&record()).unwrap();

        let content = fs::read_to_string(dir.join(WALL_SHIFTS_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], WALL_SHIFTS_HEADER.trim_end());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn orders_record_sums_volumes() {
        use crate::types::{Order, OrderId, OrderStatus};
        let order = |id: &str, side, quantity| Order {
            id: OrderId::from(id),
            side,
            price: 0.004,
            quantity,
            status: OrderStatus::Open,
            market: "nbtbtc".into(),
            created_at: None,
        };
        let book = OrderBookSnapshot::from_orders(vec![
            order("1", Side::Sell, 10.0),
            order("2", Side::Buy, 4.0),
            order("3", Side::Buy, 1.5),
        ]);
        let rec = OrdersRecord::from_snapshot(StrategyState::Steady, &book);
        assert_eq!(rec.sell_volume, 10.0);
        assert_eq!(rec.buy_volume, 5.5);
        assert!(rec.csv_row().contains(",steady,1,2,3,"));
    }
}
