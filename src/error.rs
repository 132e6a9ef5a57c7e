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

use std::fmt;

/// Everything that can go wrong while building a tree of shapes or running the
/// tree isotonic regression.
#[derive(Debug, Clone, PartialEq)]
pub enum FlstError {
  /// Input image has a zero-sized axis
  EmptyImage,
  /// Two buffers that should have the same number of elements do not
  SizeMismatch { expected: usize, actual: usize },
  /// Two images that should have the same dimensions (width, height) do not
  ShapeMismatch { expected: (usize, usize), actual: (usize, usize) },
  /// Pixel at this (linear, row-major) index is NaN or infinite
  NonFinite { index: usize },
  /// Invalid settings were passed to a builder
  Config(String),
  /// The explicit tree handed to the regression is malformed
  InvalidTree(String),
  /// The root shape can never be ignored
  RootIgnored,
  /// An internal invariant was violated while building the tree. This means
  /// either the input is impossible or there is a bug in this crate.
  Corrupt(String),
}

impl fmt::Display for FlstError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::EmptyImage => write!(f, "image has no pixels"),
      Self::SizeMismatch { expected, actual } => {
        write!(f, "size mismatch: expected {expected} elements, got {actual}")
      }
      Self::ShapeMismatch { expected, actual } => write!(
        f,
        "image dimensions differ: expected {}x{}, got {}x{}",
        expected.0, expected.1, actual.0, actual.1
      ),
      Self::NonFinite { index } => write!(f, "pixel {index} is not a finite number"),
      Self::Config(why) => write!(f, "invalid configuration: {why}"),
      Self::InvalidTree(why) => write!(f, "invalid regression tree: {why}"),
      Self::RootIgnored => write!(f, "the root of the tree of shapes cannot be ignored"),
      Self::Corrupt(why) => write!(f, "tree of shapes invariant violated: {why}"),
    }
  }
}

impl std::error::Error for FlstError {}
