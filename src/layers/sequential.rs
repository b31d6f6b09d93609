use log::debug;

use super::Layer;
use crate::error::Result;
use crate::matrix::Matrix;
use crate::optim::Parameter;

/// Runs its children in order; backward runs them in reverse.
#[derive(Default)]
pub struct Sequential {
    children: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_layers(children: Vec<Box<dyn Layer>>) -> Self {
        Self { children }
    }

    pub fn push(&mut self, layer: impl Layer + 'static) -> &mut Self {
        debug!("sequential: appending {}", layer.kind());
        self.children.push(Box::new(layer));
        self
    }

    pub fn push_boxed(&mut self, layer: Box<dyn Layer>) -> &mut Self {
        self.children.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Layer + 'static)> {
        self.children.get_mut(index).map(|b| b.as_mut())
    }
}

impl Layer for Sequential {
    fn kind(&self) -> &'static str {
        "sequential"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let mut x = input.clone();
        for child in &mut self.children {
            x = child.forward(&x)?;
            #[cfg(feature = "paranoia")]
            if x.has_nan() {
                log::error!("{} produced NaN", child.kind());
                return Err(crate::error::AntError::NotANumber { layer: child.kind() });
            }
        }
        Ok(x)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let mut g = grad.clone();
        for child in self.children.iter_mut().rev() {
            g = child.backward(&g)?;
        }
        Ok(g)
    }

    fn update(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.update()?;
        }
        Ok(())
    }

    fn zero_grad(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.zero_grad()?;
        }
        Ok(())
    }

    fn params(&self) -> Vec<&Parameter> {
        self.children.iter().flat_map(|c| c.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.children.iter_mut().flat_map(|c| c.params_mut()).collect()
    }

    fn meta(&self) -> Vec<usize> {
        vec![self.children.len()]
    }

    fn children(&self) -> &[Box<dyn Layer>] {
        &self.children
    }
}
