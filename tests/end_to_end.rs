use std::f64::consts::PI;

use timesvd::{FitDiagnostics, FrequencyMode, ModelConfig, ModelError, Record, RecordStore, TimeSvd};

const M: u32 = 10;
const RATE: f64 = 0.01;

fn config() -> ModelConfig {
    ModelConfig {
        rank: 2,
        max_date: M,
        user_time_bins: 2,
        item_time_bins: 2,
        power_law_betas: vec![0.4],
        frequencies: Some(vec![1.0]),
        frequency_mode: FrequencyMode::Listed,
        drift_beta: 0.4,
        learning_rate: RATE,
        batch_size: 16,
        n_threads: 1,
        shuffle: false,
        implicit_feedback: false,
        ..ModelConfig::default()
    }
}

fn ratings() -> RecordStore {
    RecordStore::new(vec![
        Record::new(1, 1, 2, 4.0),
        Record::new(1, 2, 5, 3.0),
        Record::new(2, 1, 4, 5.0),
        Record::new(2, 2, 9, 2.0),
        Record::new(3, 1, 7, 4.0),
        Record::new(3, 2, 3, 3.0),
    ])
}

fn u0_init(i: usize, f: usize) -> f64 {
    0.1 * (i + 1) as f64 + 0.05 * f as f64
}

fn u1_init(i: usize, f: usize) -> f64 {
    let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
    sign * 0.02 * (f + 1) as f64
}

fn v_init(j: usize, f: usize) -> f64 {
    0.2 - 0.07 * j as f64 + 0.03 * f as f64
}

fn a_init(i: usize, r: usize) -> f64 {
    0.01 * ((r + 1) * (i + 1)) as f64
}

fn b_init(j: usize, r: usize) -> f64 {
    -0.02 * (r + 1) as f64 + 0.01 * j as f64
}

fn abin_init(bin: usize) -> f64 {
    0.05 * (bin + 1) as f64
}

fn bbin_init(bin: usize) -> f64 {
    -0.03 * (bin + 1) as f64
}

fn pw(t: i64, beta: f64) -> f64 {
    let x = t as f64 / M as f64;
    x.signum() * x.abs().powf(beta)
}

/// [constant, t^0.4, sin(pi t / M), cos(pi t / M)]
fn bias_basis(t: i64) -> [f64; 4] {
    let x = t as f64 / M as f64 * PI;
    [1.0, pw(t, 0.4), x.sin(), x.cos()]
}

fn bin(date: u32) -> usize {
    ((date - 1) * 2 / M) as usize
}

/// Straight-line sequential SGD over the same model.
struct Reference {
    mu: f64,
    origin_user: [u32; 3],
    origin_item: [u32; 2],
    u0: [[f64; 2]; 3],
    u1: [[f64; 2]; 3],
    v: [[f64; 2]; 2],
    a: [[f64; 4]; 3],
    b: [[f64; 4]; 2],
    abin: [[f64; 2]; 3],
    bbin: [[f64; 2]; 2],
}

impl Reference {
    fn new() -> Self {
        let mut r = Reference {
            // (4 + 3 + 5 + 2 + 4 + 3) / 6
            mu: 3.5,
            // user 1: (2+5)/2, user 2: (4+9)/2, user 3: (7+3)/2
            origin_user: [3, 6, 5],
            // item 1: (2+4+7)/3, item 2: (5+9+3)/3, truncated
            origin_item: [4, 5],
            u0: [[0.0; 2]; 3],
            u1: [[0.0; 2]; 3],
            v: [[0.0; 2]; 2],
            a: [[0.0; 4]; 3],
            b: [[0.0; 4]; 2],
            abin: [[0.0; 2]; 3],
            bbin: [[0.0; 2]; 2],
        };
        for i in 0..3 {
            for f in 0..2 {
                r.u0[i][f] = u0_init(i, f);
                r.u1[i][f] = u1_init(i, f);
            }
            for k in 0..4 {
                r.a[i][k] = a_init(i, k);
            }
            for k in 0..2 {
                r.abin[i][k] = abin_init(k);
            }
        }
        for j in 0..2 {
            for f in 0..2 {
                r.v[j][f] = v_init(j, f);
            }
            for k in 0..4 {
                r.b[j][k] = b_init(j, k);
            }
            for k in 0..2 {
                r.bbin[j][k] = bbin_init(k);
            }
        }
        r
    }

    /// Drift weight, composed user vector and both bias bases.
    fn terms(&self, user: u32, item: u32, date: u32) -> (f64, [f64; 2], [f64; 4], [f64; 4]) {
        let (i, j) = (user as usize - 1, item as usize - 1);
        let tu = date as i64 - self.origin_user[i] as i64;
        let ti = date as i64 - self.origin_item[j] as i64;
        let w = pw(tu, 0.4);
        let u_eff = [
            self.u0[i][0] + w * self.u1[i][0],
            self.u0[i][1] + w * self.u1[i][1],
        ];
        (w, u_eff, bias_basis(tu), bias_basis(ti))
    }

    fn raw(&self, user: u32, item: u32, date: u32) -> f64 {
        let (i, j) = (user as usize - 1, item as usize - 1);
        let (_, u_eff, fa, fb) = self.terms(user, item, date);
        let mut s = self.mu;
        s += u_eff[0] * self.v[j][0] + u_eff[1] * self.v[j][1];
        s += (0..4).map(|k| fa[k] * self.a[i][k]).sum::<f64>();
        s += (0..4).map(|k| fb[k] * self.b[j][k]).sum::<f64>();
        s += self.abin[i][bin(date)] + self.bbin[j][bin(date)];
        s
    }

    fn step(&mut self, r: &Record) {
        let (i, j) = (r.user as usize - 1, r.item as usize - 1);
        let (w, u_eff, fa, fb) = self.terms(r.user, r.item, r.date);
        let pred = self.raw(r.user, r.item, r.date);
        let step = RATE * 2.0 * (r.score as f64 - pred);
        let v_old = self.v[j];
        for f in 0..2 {
            self.u0[i][f] += step * v_old[f];
            self.u1[i][f] += step * w * v_old[f];
            self.v[j][f] += step * u_eff[f];
        }
        for k in 0..4 {
            self.a[i][k] += step * fa[k];
            self.b[j][k] += step * fb[k];
        }
        self.abin[i][bin(r.date)] += step;
        self.bbin[j][bin(r.date)] += step;
    }
}

fn seeded_model(data: &RecordStore) -> TimeSvd {
    let mut model = TimeSvd::new(config()).unwrap();
    model.init(data).unwrap();
    let params = model.params_mut().unwrap();
    for i in 0..3 {
        for f in 0..2 {
            *params.u0.get_mut(f, i) = u0_init(i, f);
            *params.u1.get_mut(f, i) = u1_init(i, f);
        }
        for k in 0..4 {
            *params.a.get_mut(k, i) = a_init(i, k);
        }
        for k in 0..2 {
            *params.a_timebin.get_mut(k, i) = abin_init(k);
        }
    }
    for j in 0..2 {
        for f in 0..2 {
            *params.v.get_mut(f, j) = v_init(j, f);
        }
        for k in 0..4 {
            *params.b.get_mut(k, j) = b_init(j, k);
        }
        for k in 0..2 {
            *params.b_timebin.get_mut(k, j) = bbin_init(k);
        }
    }
    model
}

#[test]
fn test_one_epoch_matches_hand_computation() {
    let data = ratings();
    let mut model = seeded_model(&data);
    let mut reference = Reference::new();

    let params = model.params().unwrap();
    assert_eq!(params.mu, reference.mu);
    assert_eq!(params.date_origin_user, reference.origin_user.to_vec());
    assert_eq!(params.date_origin_item, reference.origin_item.to_vec());
    assert_eq!(params.a.rows(), 4);

    let query = Record::new(2, 1, 7, 0.0);
    let before = model.predict(&query).unwrap();
    assert!((before - reference.raw(2, 1, 7).clamp(1.0, 5.0)).abs() < 1e-9);

    let reports = model.fit(&data, 1, true).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].learning_rate, RATE);

    for r in &data {
        reference.step(r);
    }
    let expected = reference.raw(2, 1, 7).clamp(1.0, 5.0);
    let got = model.predict(&query).unwrap();
    assert!((got - expected).abs() < 1e-6, "{got} vs {expected}");
    assert!(got != before);

    let params = model.params().unwrap();
    for f in 0..2 {
        assert!((params.v.get(f, 1) - reference.v[1][f]).abs() < 1e-12);
        assert!((params.u1.get(f, 2) - reference.u1[2][f]).abs() < 1e-12);
    }
}

#[test]
fn test_empty_fit_only_shrinks() {
    let config = ModelConfig {
        u0_lambda: 0.5,
        v_lambda: 0.25,
        learning_rate: 0.1,
        learning_rate_decay: 0.5,
        regularization_power: 2.0,
        ..config()
    };
    let mut model = TimeSvd::new(config.clone()).unwrap();
    model.init(&ratings()).unwrap();
    let u0_before = model.params().unwrap().u0.frobenius_norm();
    let v_before = model.params().unwrap().v.frobenius_norm();
    let mu_before = model.params().unwrap().mu;

    let epochs = 4;
    let reports = model.fit(&RecordStore::default(), epochs, true).unwrap();
    assert_eq!(reports.len(), epochs);

    // Shrink runs between epochs only: rates 0.1, 0.05, 0.025.
    let factor = |lambda: f64| -> f64 {
        (0..epochs - 1)
            .map(|e| (1.0 - lambda * 0.1 * 0.5f64.powi(e as i32)).powf(2.0))
            .product()
    };
    let params = model.params().unwrap();
    assert!((params.u0.frobenius_norm() - u0_before * factor(0.5)).abs() < 1e-9);
    assert!((params.v.frobenius_norm() - v_before * factor(0.25)).abs() < 1e-9);
    assert_eq!(params.mu, mu_before);
    assert!((reports[3].learning_rate - 0.0125).abs() < 1e-15);
}

#[test]
fn test_fit_from_record_file_with_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("train.bin");

    let mut rows = Vec::new();
    for u in 1..=12u32 {
        for i in 1..=8u32 {
            if (u * 3 + i) % 4 != 0 {
                let score = ((u + 2 * i) % 5 + 1) as f32;
                rows.push(Record::new(u, i, (u * 13 + i * 7) % 200 + 1, score));
            }
        }
    }
    RecordStore::new(rows).write_to(&path).unwrap();
    let data = RecordStore::read_from(&path).unwrap();

    let config = ModelConfig {
        rank: 4,
        max_date: 200,
        user_time_bins: 5,
        item_time_bins: 5,
        batch_size: 7,
        n_threads: 3,
        learning_rate: 0.005,
        implicit_feedback: true,
        ..ModelConfig::default()
    };
    let mut model = TimeSvd::new(config).unwrap();
    model.init(&data).unwrap();
    let params = model.params_mut().unwrap();
    for m in [&mut params.u0, &mut params.v, &mut params.y, &mut params.a, &mut params.b] {
        m.scale(0.01);
    }

    let holdout = &data.as_slice()[..10];
    let reports = model
        .fit_with(
            &data,
            15,
            true,
            FitDiagnostics {
                validation: Some(holdout),
                qualifying: None,
            },
        )
        .unwrap();
    let first = reports[0].validation_rmse.unwrap();
    let last = reports[14].validation_rmse.unwrap();
    assert!(last < first, "validation rmse {first} -> {last}");
    assert!(reports.iter().all(|r| r.magnitudes.u0.is_finite()));
}

#[test]
fn test_invalid_inputs_are_typed_errors() {
    let mut model = TimeSvd::new(config()).unwrap();
    assert!(matches!(
        model.fit(&RecordStore::default(), 1, false),
        Err(ModelError::EmptyTrainingSet)
    ));
    let bad_date = RecordStore::new(vec![Record::new(1, 1, M + 1, 3.0)]);
    assert!(matches!(
        model.fit(&bad_date, 1, false),
        Err(ModelError::InvalidRecord { index: 0, .. })
    ));
    let zero_id = RecordStore::new(vec![Record::new(1, 1, 1, 3.0), Record::new(0, 1, 1, 3.0)]);
    assert!(matches!(
        model.fit(&zero_id, 1, false),
        Err(ModelError::InvalidRecord { index: 1, .. })
    ));
}
