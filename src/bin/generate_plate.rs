//! Writes a synthetic 96-well plate of Parquet event tables for manual testing.
//!
//! Usage: `generate_plate [OUTPUT_DIR]` (default `plate_data`).

use std::path::PathBuf;

use anyhow::Context;
use log::info;
use wellplate::{
    write_parquet, ApplyOptions, EventTable, Grid, IdParser, Meta, MetadataValue, Plate,
    SourceQuery, TableReader,
};

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

const CHANNELS: [&str; 3] = ["FSC-A", "SSC-A", "B1-A"];

/// Two scatter populations; the share of the bright one grows with `dose`.
fn generate_events(n: usize, dose: f64, rng: &mut SimpleRng) -> EventTable {
    let bright_share = dose / (dose + 1.0);
    let mut columns = vec![Vec::with_capacity(n); CHANNELS.len()];
    for _ in 0..n {
        let bright = rng.next_f64() < bright_share;
        let (fsc, ssc, fl) = if bright {
            (60_000.0, 25_000.0, 8_000.0)
        } else {
            (40_000.0, 15_000.0, 300.0)
        };
        columns[0].push(rng.gauss(fsc, fsc * 0.08));
        columns[1].push(rng.gauss(ssc, ssc * 0.1));
        columns[2].push(rng.gauss(fl, fl * 0.2).max(0.0));
    }
    EventTable {
        channels: CHANNELS.iter().map(|c| c.to_string()).collect(),
        columns,
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let out_dir = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| "plate_data".into()));
    std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {out_dir:?}"))?;

    let mut rng = SimpleRng::new(42);
    let grid = Grid::default();
    let operators = ["Alice", "Bob"];

    for (i, position) in grid.positions().enumerate() {
        // Leave the last column empty so the plate has unmeasured wells.
        if position.col == 12 {
            continue;
        }
        let dose = 0.1 * 2f64.powi(position.col as i32 - 1);
        let n_events = 500 + (rng.next_u64() % 500) as usize;
        let table = generate_events(n_events, dose, &mut rng);

        let well = position.well_name();
        let meta = Meta::from([
            ("$SRC".to_string(), MetadataValue::from(well.as_str())),
            ("$TOT".to_string(), MetadataValue::from(n_events)),
            ("dose".to_string(), MetadataValue::Float(dose)),
            ("operator".to_string(), MetadataValue::from(operators[i % 2])),
        ]);
        write_parquet(&out_dir.join(format!("plate_{well}.parquet")), &table, &meta)?;
    }
    info!("wrote plate files to {out_dir:?}");

    let mut plate = Plate::<TableReader>::from_dir(
        "generated",
        grid,
        &SourceQuery::new(&out_dir).pattern("*.parquet"),
        &IdParser::Name,
    )?;
    plate.apply(
        |t| t.data().map_or(0, EventTable::num_events),
        &["events"],
        MetadataValue::Null,
        &ApplyOptions::new(),
    )?;
    if let Some(events) = plate.extracted("events") {
        println!("Events per well:\n{events}");
    }
    Ok(())
}
