/*
  Copyright© 2023 Raúl Wolters(1)

  This file is part of rustronomy-flst.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

//! Isotonic regression on a tree.
//!
//! Given a rooted tree with a target `yᵢ`, a weight `wᵢ ≥ 0` and a sign `sᵢ`
//! per node, this module computes
//! ```text
//!   argmin Σ wᵢ (xᵢ - yᵢ)²   subject to   sᵢ (xᵢ - x_parent(i)) ≥ 0
//! ```
//! by dynamic programming over the derivatives of the partial costs. Every
//! node sends its parent a [`Message`]: the (non-decreasing, piecewise linear)
//! derivative of the best cost of its subtree as a function of the parent's
//! value. Messages are fused bottom-up, after which a top-down pass pools
//! every node that violates its constraint to the value of its parent.

use std::collections::VecDeque;
use std::fmt;

use crate::FlstError;

/// Monotonicity of a node relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
  /// The node must not be larger than its parent
  Negative,
  /// No constraint. Only valid for the root.
  Free,
  /// The node must not be smaller than its parent
  Positive,
}

impl Sign {
  #[inline(always)]
  pub fn value(self) -> f64 {
    match self {
      Sign::Negative => -1.0,
      Sign::Free => 0.0,
      Sign::Positive => 1.0,
    }
  }
}

impl TryFrom<i32> for Sign {
  type Error = FlstError;

  fn try_from(s: i32) -> Result<Self, Self::Error> {
    match s {
      -1 => Ok(Sign::Negative),
      0 => Ok(Sign::Free),
      1 => Ok(Sign::Positive),
      other => Err(FlstError::InvalidTree(format!("sign must be -1, 0 or 1, got {other}"))),
    }
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                 MESSAGES                                   //
////////////////////////////////////////////////////////////////////////////////

/// Kink of a piecewise linear function: the slope grows by `slope` at `x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
  pub x: f64,
  pub slope: f64,
}

/// Non-decreasing piecewise linear function.
///
/// Stored as its breakpoints in ascending order plus the two affine rays that
/// the function follows towards -∞ (`am·t + bm`) and +∞ (`ap·t + bp`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
  am: f64,
  bm: f64,
  ap: f64,
  bp: f64,
  knots: VecDeque<Breakpoint>,
}

impl Message {
  /// Build a message from its breakpoints (`(x, slope)`, ascending in x) and
  /// its rays `(slope, intercept)` at -∞ and +∞.
  pub fn new<I>(breakpoints: I, lower: (f64, f64), upper: (f64, f64)) -> Self
  where
    I: IntoIterator<Item = (f64, f64)>,
  {
    Message {
      am: lower.0,
      bm: lower.1,
      ap: upper.0,
      bp: upper.1,
      knots: breakpoints.into_iter().map(|(x, slope)| Breakpoint { x, slope }).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.knots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.knots.is_empty()
  }

  pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> + '_ {
    self.knots.iter()
  }

  /// `(slope, intercept)` of the ray at -∞
  pub fn lower_ray(&self) -> (f64, f64) {
    (self.am, self.bm)
  }

  /// `(slope, intercept)` of the ray at +∞
  pub fn upper_ray(&self) -> (f64, f64) {
    (self.ap, self.bp)
  }

  /// Value of the function at `t`, accumulated from the ray at -∞
  pub fn eval(&self, t: f64) -> f64 {
    let (a, b) = self.knots.iter().take_while(|k| k.x < t).fold((self.am, self.bm), |(a, b), k| {
      (a + k.slope, b - k.x * k.slope)
    });
    a * t + b
  }

  /// Sum of two messages: a linear merge of the breakpoint lists.
  ///
  /// Breakpoints with the same x are kept as two adjacent entries, `other`'s
  /// first.
  pub fn fusion(self, other: Message) -> Message {
    let mut knots = VecDeque::with_capacity(self.knots.len() + other.knots.len());
    let mut lhs = self.knots.into_iter().peekable();
    let mut rhs = other.knots.into_iter().peekable();
    loop {
      let take_lhs = match (lhs.peek(), rhs.peek()) {
        (Some(l), Some(r)) => l.x < r.x,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => break,
      };
      let next = if take_lhs { lhs.next() } else { rhs.next() };
      knots.extend(next);
    }
    Message {
      am: self.am + other.am,
      bm: self.bm + other.bm,
      ap: self.ap + other.ap,
      bp: self.bp + other.bp,
      knots,
    }
  }

  /// Add the derivative of `weight·(t - target)²/2`
  pub fn add_quadratic(&mut self, weight: f64, target: f64) {
    self.am += weight;
    self.bm -= weight * target;
    self.ap += weight;
    self.bp -= weight * target;
  }

  /// Replace f by the derivative of `g(y) = inf { F(x) : s·(x - y) ≥ 0 }`,
  /// where F is the primitive of f, and return the minimiser of F.
  ///
  /// For `sign ≥ 0` the breakpoints below the zero of f are consumed from the
  /// front and the ray at -∞ becomes zero. For `sign < 0` the same happens
  /// from the back. Returns `None` when f is zero everywhere (a subtree
  /// without weight), in which case any value is optimal.
  pub fn inf_convolution(&mut self, sign: Sign) -> Option<f64> {
    if sign != Sign::Negative {
      let (mut a, mut b) = (self.am, self.bm);
      while let Some(&k) = self.knots.front() {
        if a * k.x + b >= 0.0 {
          break;
        }
        a += k.slope;
        b -= k.x * k.slope;
        self.knots.pop_front();
      }
      self.am = 0.0;
      self.bm = 0.0;
      if a == 0.0 {
        //flat up to the next kink (if any): that kink is a minimiser
        return self.knots.front().map(|k| k.x);
      }
      let x = -b / a;
      self.knots.push_front(Breakpoint { x, slope: a });
      Some(x)
    } else {
      let (mut a, mut b) = (self.ap, self.bp);
      while let Some(&k) = self.knots.back() {
        if a * k.x + b <= 0.0 {
          break;
        }
        a -= k.slope;
        b += k.x * k.slope;
        self.knots.pop_back();
      }
      self.ap = 0.0;
      self.bp = 0.0;
      if a == 0.0 {
        return self.knots.back().map(|k| k.x);
      }
      let x = -b / a;
      self.knots.push_back(Breakpoint { x, slope: -a });
      Some(x)
    }
  }
}

////////////////////////////////////////////////////////////////////////////////
//                              REGRESSION TREE                               //
////////////////////////////////////////////////////////////////////////////////

/// One node of a [`RegressionTree`]
#[derive(Debug, Clone)]
pub struct RegressionNode {
  sign: Sign,
  target: f64,
  weight: f64,
  value: f64,
  parent: Option<usize>,
  children: Vec<usize>,
}

impl RegressionNode {
  pub fn sign(&self) -> Sign {
    self.sign
  }
  pub fn target(&self) -> f64 {
    self.target
  }
  pub fn weight(&self) -> f64 {
    self.weight
  }
  /// Result of the regression, zero until [`RegressionTree::solve`] ran
  pub fn value(&self) -> f64 {
    self.value
  }
  pub fn parent(&self) -> Option<usize> {
    self.parent
  }
  pub fn children(&self) -> &[usize] {
    &self.children
  }
}

/// Explicit tree for the isotonic regression, stored as an arena of nodes.
#[derive(Debug, Clone)]
pub struct RegressionTree {
  nodes: Vec<RegressionNode>,
  root: usize,
}

impl RegressionTree {
  /// Build a tree from per-node arrays. `parents[i]` is the (0-based) parent
  /// of node `i`; exactly one node, the root, has no parent.
  pub fn new(
    parents: &[Option<usize>],
    signs: &[Sign],
    weights: &[f64],
    targets: &[f64],
  ) -> Result<Self, FlstError> {
    //(1) Check the arrays
    let n = parents.len();
    if n == 0 {
      return Err(FlstError::InvalidTree("tree has no nodes".to_string()));
    }
    for len in [signs.len(), weights.len(), targets.len()] {
      if len != n {
        return Err(FlstError::SizeMismatch { expected: n, actual: len });
      }
    }
    if let Some(i) = weights.iter().position(|w| !(w.is_finite() && *w >= 0.0)) {
      return Err(FlstError::InvalidTree(format!("weight of node {i} is {}", weights[i])));
    }
    if let Some(i) = targets.iter().position(|y| !y.is_finite()) {
      return Err(FlstError::InvalidTree(format!("target of node {i} is {}", targets[i])));
    }

    //(2) Link the nodes
    let mut nodes: Vec<RegressionNode> = (0..n)
      .map(|i| RegressionNode {
        sign: signs[i],
        target: targets[i],
        weight: weights[i],
        value: 0.0,
        parent: parents[i],
        children: Vec::new(),
      })
      .collect();
    let mut root = None;
    for (i, parent) in parents.iter().enumerate() {
      match *parent {
        None if root.is_some() => {
          return Err(FlstError::InvalidTree(format!("nodes {} and {i} are both roots", root.unwrap_or(0))))
        }
        None => root = Some(i),
        Some(p) if p >= n || p == i => {
          return Err(FlstError::InvalidTree(format!("node {i} has invalid parent {p}")))
        }
        Some(_) if signs[i] == Sign::Free => {
          return Err(FlstError::InvalidTree(format!("node {i} is not the root but has sign 0")))
        }
        Some(p) => nodes[p].children.push(i),
      }
    }
    let root = root.ok_or_else(|| FlstError::InvalidTree("tree has no root".to_string()))?;

    //(3) Every node must hang below the root, otherwise there is a cycle
    let tree = RegressionTree { nodes, root };
    let reached = tree.pre_order().len();
    if reached != n {
      return Err(FlstError::InvalidTree(format!(
        "only {reached} of {n} nodes are reachable from the root (cycle?)"
      )));
    }
    Ok(tree)
  }

  /// Build a tree from a parent array in 1-based convention: node 1 (index 0)
  /// is the root and its entry is ignored, node `i + 1` hangs below node
  /// `parents[i]`.
  pub fn from_one_based(
    parents: &[usize],
    signs: &[Sign],
    weights: &[f64],
    targets: &[f64],
  ) -> Result<Self, FlstError> {
    let parents: Vec<Option<usize>> = parents
      .iter()
      .enumerate()
      .map(|(i, &p)| match (i, p) {
        (0, _) => Ok(None),
        (i, 0) => Err(FlstError::InvalidTree(format!("node {} has parent 0", i + 1))),
        (_, p) => Ok(Some(p - 1)),
      })
      .collect::<Result<_, _>>()?;
    Self::new(&parents, signs, weights, targets)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn root(&self) -> usize {
    self.root
  }

  pub fn node(&self, i: usize) -> &RegressionNode {
    &self.nodes[i]
  }

  pub fn values(&self) -> Vec<f64> {
    self.nodes.iter().map(|n| n.value).collect()
  }

  //Nodes reachable from the root, parents before children, children in order
  fn pre_order(&self) -> Vec<usize> {
    let mut order = Vec::with_capacity(self.nodes.len());
    let mut stack = vec![self.root];
    while let Some(i) = stack.pop() {
      order.push(i);
      stack.extend(self.nodes[i].children.iter().rev());
    }
    order
  }

  /// Run the regression and store the optimal value in every node.
  pub fn solve(&mut self) {
    let order = self.pre_order();

    /*(1) Bottom-up: children before parents. Each node fuses the messages of
      its children, adds its own quadratic term and projects the result onto
      its constraint, which also yields its unconstrained optimum.
    */
    let mut messages: Vec<Message> = vec![Message::default(); self.nodes.len()];
    let mut optimum: Vec<Option<f64>> = vec![None; self.nodes.len()];
    for &i in order.iter().rev() {
      let mut m = Message::default();
      for &c in &self.nodes[i].children {
        m = m.fusion(std::mem::take(&mut messages[c]));
      }
      let node = &self.nodes[i];
      m.add_quadratic(node.weight, node.target);
      optimum[i] = m.inf_convolution(node.sign);
      messages[i] = m;
    }
    drop(messages);

    /*(2) Top-down: pool every node whose optimum violates its constraint to
      the value of its parent.
    */
    for &i in &order {
      let node = &self.nodes[i];
      let value = match node.parent {
        None => optimum[i].unwrap_or(node.target),
        Some(p) => {
          let y = self.nodes[p].value;
          match optimum[i] {
            Some(x) if node.sign.value() * (x - y) >= 0.0 => x,
            _ => y,
          }
        }
      };
      self.nodes[i].value = value;
    }

    log::debug!("solved isotonic regression on {} nodes, score {:.3e}", self.len(), self.score());
  }

  /// Σ w (x - y)² / 2 over the whole tree
  pub fn score(&self) -> f64 {
    self.nodes.iter().map(|n| n.weight * (n.value - n.target).powi(2) / 2.0).sum()
  }
}

impl fmt::Display for RegressionTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut stack = vec![(self.root, 0usize)];
    while let Some((i, depth)) = stack.pop() {
      let n = &self.nodes[i];
      writeln!(
        f,
        "{:indent$}s : {} -- x : {}, y : {} -- w : {}",
        "",
        n.sign.value(),
        n.value,
        n.target,
        n.weight,
        indent = 2 * depth
      )?;
      stack.extend(n.children.iter().rev().map(|&c| (c, depth + 1)));
    }
    Ok(())
  }
}

/// Tree isotonic regression on per-node arrays; see [`RegressionTree::new`]
/// for the conventions. Returns the optimal value of every node.
pub fn isotonic_regression_tree(
  parents: &[Option<usize>],
  signs: &[Sign],
  weights: &[f64],
  targets: &[f64],
) -> Result<Vec<f64>, FlstError> {
  let mut tree = RegressionTree::new(parents, signs, weights, targets)?;
  tree.solve();
  Ok(tree.values())
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn fusion_keeps_breakpoints_sorted() {
    let m1 = Message::new([(-1.0, 1.0), (2.0, 0.5), (2.0, 1.0), (7.0, 3.0)], (0.0, 0.0), (5.5, 0.0));
    let m2 = Message::new([(0.0, 2.0), (2.0, 4.0), (9.0, 1.0)], (1.0, 1.0), (8.0, 1.0));
    let fused = m1.fusion(m2);
    let xs: Vec<f64> = fused.breakpoints().map(|k| k.x).collect();
    assert_eq!(xs, vec![-1.0, 0.0, 2.0, 2.0, 2.0, 7.0, 9.0]);
    assert!(xs.windows(2).all(|w| w[0] <= w[1]));
    //coincident breakpoints are kept, not merged
    assert_eq!(fused.len(), 7);
    assert_eq!(fused.lower_ray(), (1.0, 1.0));
    assert_eq!(fused.upper_ray(), (13.5, 1.0));
  }

  #[test]
  fn fusion_puts_other_first_on_ties() {
    let m1 = Message::new([(1.0, 10.0)], (0.0, 0.0), (10.0, -10.0));
    let m2 = Message::new([(1.0, 20.0)], (0.0, 0.0), (20.0, -20.0));
    let slopes: Vec<f64> = m1.fusion(m2).breakpoints().map(|k| k.slope).collect();
    assert_eq!(slopes, vec![20.0, 10.0]);
  }

  #[test]
  fn leaf_projection_is_its_target() {
    let mut m = Message::default();
    m.add_quadratic(2.0, 3.0);
    assert_eq!(m.inf_convolution(Sign::Positive), Some(3.0));
    assert_eq!(m.lower_ray(), (0.0, 0.0));
    assert_eq!(m.eval(2.0), 0.0);
    assert_eq!(m.eval(5.0), 4.0);

    let mut m = Message::default();
    m.add_quadratic(2.0, 3.0);
    assert_eq!(m.inf_convolution(Sign::Negative), Some(3.0));
    assert_eq!(m.upper_ray(), (0.0, 0.0));
    assert_eq!(m.eval(4.0), 0.0);
    assert_eq!(m.eval(1.0), -4.0);
  }

  #[test]
  fn weightless_leaf_is_pooled() {
    let values = isotonic_regression_tree(
      &[None, Some(0)],
      &[Sign::Free, Sign::Positive],
      &[1.0, 0.0],
      &[4.0, 100.0],
    )
    .unwrap();
    assert_eq!(values, vec![4.0, 4.0]);
  }

  #[test]
  fn two_node_violation_pools() {
    let values = isotonic_regression_tree(
      &[None, Some(0)],
      &[Sign::Free, Sign::Positive],
      &[1.0, 1.0],
      &[3.0, 1.0],
    )
    .unwrap();
    assert_eq!(values, vec![2.0, 2.0]);
  }

  #[test]
  fn chain_matches_hand_computed_pav() {
    let values = isotonic_regression_tree(
      &[None, Some(0), Some(1)],
      &[Sign::Free, Sign::Positive, Sign::Positive],
      &[1.0, 1.0, 1.0],
      &[1.0, 3.0, 2.0],
    )
    .unwrap();
    assert_eq!(values, vec![1.0, 2.5, 2.5]);
  }

  #[test]
  fn one_based_parents() {
    let tree = RegressionTree::from_one_based(
      &[0, 1, 1],
      &[Sign::Free, Sign::Negative, Sign::Positive],
      &[1.0, 1.0, 1.0],
      &[0.0, 1.0, -1.0],
    )
    .unwrap();
    assert_eq!(tree.node(0).children(), &[1, 2]);
  }

  #[test]
  fn malformed_trees_are_rejected() {
    let s = [Sign::Free, Sign::Positive];
    let w = [1.0, 1.0];
    let y = [0.0, 0.0];
    assert!(RegressionTree::new(&[None, None], &s, &w, &y).is_err());
    assert!(RegressionTree::new(&[Some(1), Some(0)], &s, &w, &y).is_err());
    assert!(RegressionTree::new(&[None, Some(5)], &s, &w, &y).is_err());
    assert!(RegressionTree::new(&[None, Some(0)], &[Sign::Free, Sign::Free], &w, &y).is_err());
    assert!(RegressionTree::new(&[None, Some(0)], &s, &[1.0, -1.0], &y).is_err());
    assert_eq!(
      RegressionTree::new(&[None, Some(0)], &s, &w, &[0.0]).unwrap_err(),
      FlstError::SizeMismatch { expected: 2, actual: 1 }
    );
    assert!(Sign::try_from(2).is_err());
  }
}
