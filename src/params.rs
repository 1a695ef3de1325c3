//! The parameter store: every mutable quantity of a fitted model.

use crate::matrix::DenseMatrix;

/// Factor matrices are `rank × n_user` / `rank × n_item`, bias coefficient
/// matrices are `basis rows × entities`, time-bin tables `bins × entities`.
/// Column `c` belongs to the entity with id `c + 1`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelParams {
    pub mu: f64,

    /// Static user embedding.
    pub u0: DenseMatrix,
    /// User drift embedding, weighted by the drift basis at the user's offset.
    pub u1: DenseMatrix,
    pub v: DenseMatrix,
    /// Implicit-feedback item embedding.
    pub y: DenseMatrix,

    pub a: DenseMatrix,
    pub b: DenseMatrix,
    pub a_timebin: DenseMatrix,
    pub b_timebin: DenseMatrix,

    /// Mean observation date per user / item.
    pub date_origin_user: Vec<u32>,
    pub date_origin_item: Vec<u32>,

    /// Per-row shrink strength of `a` / `b`.
    pub a_lambda: Vec<f64>,
    pub b_lambda: Vec<f64>,

    /// 0-based item indices each user rated; rebuilt on every fit.
    pub rated_items: Vec<Vec<u32>>,
}

/// Largest absolute value of each tracked matrix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParameterMagnitudes {
    pub u0: f64,
    pub u1: f64,
    pub v: f64,
    pub y: f64,
    pub a: f64,
    pub b: f64,
}

impl ModelParams {
    pub fn rank(&self) -> usize {
        self.u0.rows()
    }

    pub fn n_users(&self) -> usize {
        self.u0.cols()
    }

    pub fn n_items(&self) -> usize {
        self.v.cols()
    }

    pub fn magnitudes(&self) -> ParameterMagnitudes {
        ParameterMagnitudes {
            u0: self.u0.max_abs(),
            u1: self.u1.max_abs(),
            v: self.v.max_abs(),
            y: self.y.max_abs(),
            a: self.a.max_abs(),
            b: self.b.max_abs(),
        }
    }

    /// Indexes `rated_items` by user from the given (user, item) pairs.
    pub fn rebuild_rated_items(&mut self, pairs: impl IntoIterator<Item = (u32, u32)>) {
        let mut lists = vec![Vec::new(); self.n_users()];
        for (user, item) in pairs {
            lists[user as usize - 1].push(item - 1);
        }
        self.rated_items = lists;
    }
}
