//! Binary model artifact.
//!
//! Layout, all little-endian:
//! ```text
//! i32 model id | i32 rank
//! matrix U0 | matrix V | matrix A | matrix B | f64 mu
//! matrix U1 | matrix Y | matrix A_timebin | matrix B_timebin
//! origins user | origins item
//! u64 users | per user: u64 len | len u32 rated item
//! ```
//! `matrix` is `u64 rows | u64 cols | rows*cols f64` in column-major order,
//! `origins` is `u64 len | len u32`. Rated items are 0-based column indices.
//! The leading section is what scoring
//! needs for the static part of the model; the trailing section makes a
//! loaded model score exactly like the saved one.

use std::io::{Read, Write};

use crate::basis::TemporalBasis;
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::matrix::DenseMatrix;
use crate::params::ModelParams;

/// Identifier of this model family in saved artifacts.
pub const MODEL_ID: i32 = 10002;

fn write_matrix<W: Write>(w: &mut W, m: &DenseMatrix) -> Result<()> {
    w.write_all(&(m.rows() as u64).to_le_bytes())?;
    w.write_all(&(m.cols() as u64).to_le_bytes())?;
    for v in m.as_slice() {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn write_origins<W: Write>(w: &mut W, origins: &[u32]) -> Result<()> {
    w.write_all(&(origins.len() as u64).to_le_bytes())?;
    for v in origins {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn write_rated_items<W: Write>(w: &mut W, rated: &[Vec<u32>]) -> Result<()> {
    w.write_all(&(rated.len() as u64).to_le_bytes())?;
    for items in rated {
        write_origins(w, items)?;
    }
    Ok(())
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(r)?))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(r)?))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    Ok(f64::from_le_bytes(read_array(r)?))
}

fn read_matrix<R: Read>(r: &mut R, what: &'static str) -> Result<DenseMatrix> {
    let rows = read_u64(r)? as usize;
    let cols = read_u64(r)? as usize;
    let mut m = DenseMatrix::try_zeros(rows, cols, what)?;
    for v in m.as_mut_slice() {
        *v = read_f64(r)?;
    }
    Ok(m)
}

fn read_u32_list<R: Read>(r: &mut R, what: &'static str) -> Result<Vec<u32>> {
    let len = read_u64(r)? as usize;
    let mut out = Vec::new();
    out.try_reserve_exact(len).map_err(|_| ModelError::Allocation {
        what,
        bytes: len.saturating_mul(4),
    })?;
    for _ in 0..len {
        out.push(u32::from_le_bytes(read_array(r)?));
    }
    Ok(out)
}

/// Lists are checked against `n_users` / `n_items` before any list is read.
fn read_rated_items<R: Read>(r: &mut R, n_users: usize, n_items: usize) -> Result<Vec<Vec<u32>>> {
    let users = read_u64(r)? as usize;
    if users != n_users {
        return Err(ModelError::DimensionMismatch {
            what: "rated item lists",
            expected: n_users,
            found: users,
        });
    }
    let mut rated = Vec::with_capacity(n_users);
    for _ in 0..n_users {
        let items = read_u32_list(r, "rated items")?;
        if let Some(&bad) = items.iter().find(|&&c| c as usize >= n_items) {
            return Err(ModelError::DimensionMismatch {
                what: "rated item index",
                expected: n_items,
                found: bad as usize,
            });
        }
        rated.push(items);
    }
    Ok(rated)
}

fn expect_shape(what: &'static str, m: &DenseMatrix, rows: usize, cols: usize) -> Result<()> {
    if m.rows() != rows {
        return Err(ModelError::DimensionMismatch {
            what,
            expected: rows,
            found: m.rows(),
        });
    }
    if m.cols() != cols {
        return Err(ModelError::DimensionMismatch {
            what,
            expected: cols,
            found: m.cols(),
        });
    }
    Ok(())
}

pub fn write_params<W: Write>(w: &mut W, params: &ModelParams) -> Result<()> {
    w.write_all(&MODEL_ID.to_le_bytes())?;
    w.write_all(&(params.rank() as i32).to_le_bytes())?;
    write_matrix(w, &params.u0)?;
    write_matrix(w, &params.v)?;
    write_matrix(w, &params.a)?;
    write_matrix(w, &params.b)?;
    w.write_all(&params.mu.to_le_bytes())?;

    write_matrix(w, &params.u1)?;
    write_matrix(w, &params.y)?;
    write_matrix(w, &params.a_timebin)?;
    write_matrix(w, &params.b_timebin)?;
    write_origins(w, &params.date_origin_user)?;
    write_origins(w, &params.date_origin_item)?;
    write_rated_items(w, &params.rated_items)?;
    Ok(())
}

/// Decodes a complete store and checks it against `config`.
///
/// The id is checked before anything else is decoded; callers commit the
/// result only on success, so a failed read never touches a live model.
pub fn read_params<R: Read>(
    r: &mut R,
    config: &ModelConfig,
    basis: &TemporalBasis,
) -> Result<ModelParams> {
    let id = read_i32(r)?;
    if id != MODEL_ID {
        return Err(ModelError::ModelIdMismatch {
            expected: MODEL_ID,
            found: id,
        });
    }
    let rank = read_i32(r)?;
    if rank < 0 || rank as usize != config.rank {
        return Err(ModelError::DimensionMismatch {
            what: "rank",
            expected: config.rank,
            found: rank.max(0) as usize,
        });
    }

    let u0 = read_matrix(r, "U0")?;
    let v = read_matrix(r, "V")?;
    let a = read_matrix(r, "A")?;
    let b = read_matrix(r, "B")?;
    let mu = read_f64(r)?;
    let u1 = read_matrix(r, "U1")?;
    let y = read_matrix(r, "Y")?;
    let a_timebin = read_matrix(r, "A_timebin")?;
    let b_timebin = read_matrix(r, "B_timebin")?;
    let date_origin_user = read_u32_list(r, "date origins")?;
    let date_origin_item = read_u32_list(r, "date origins")?;

    let (n_users, n_items) = (u0.cols(), v.cols());
    expect_shape("U0", &u0, config.rank, n_users)?;
    expect_shape("V", &v, config.rank, n_items)?;
    expect_shape("U1", &u1, config.rank, n_users)?;
    expect_shape("Y", &y, config.rank, n_items)?;
    expect_shape("A", &a, basis.user.n_rows(), n_users)?;
    expect_shape("B", &b, basis.item.n_rows(), n_items)?;
    expect_shape("A_timebin", &a_timebin, config.user_time_bins as usize, n_users)?;
    expect_shape("B_timebin", &b_timebin, config.item_time_bins as usize, n_items)?;
    if date_origin_user.len() != n_users {
        return Err(ModelError::DimensionMismatch {
            what: "user date origins",
            expected: n_users,
            found: date_origin_user.len(),
        });
    }
    if date_origin_item.len() != n_items {
        return Err(ModelError::DimensionMismatch {
            what: "item date origins",
            expected: n_items,
            found: date_origin_item.len(),
        });
    }
    if let Some(&bad) = date_origin_user
        .iter()
        .chain(&date_origin_item)
        .find(|&&d| d > config.max_date)
    {
        return Err(ModelError::DimensionMismatch {
            what: "date origin",
            expected: config.max_date as usize,
            found: bad as usize,
        });
    }
    let rated_items = read_rated_items(r, n_users, n_items)?;

    Ok(ModelParams {
        mu,
        u0,
        u1,
        v,
        y,
        a_lambda: vec![config.lambda; a.rows()],
        b_lambda: vec![config.lambda; b.rows()],
        a,
        b,
        a_timebin,
        b_timebin,
        date_origin_user,
        date_origin_item,
        rated_items,
    })
}
