use super::Relu;

/// An element-wise activation function applied at the output of a layer.
#[derive(Debug, Clone)]
pub enum ActFn {
    Relu(Relu),
}

impl ActFn {
    pub fn relu() -> Self {
        Self::Relu(Relu)
    }

    /// Evaluates the function at `z`.
    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Relu(a) => a.f(z),
        }
    }

    /// Evaluates the derivative of the function at `z`.
    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Relu(a) => a.df(z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_passes_positives_and_zeroes_the_rest() {
        let act = ActFn::relu();

        assert_eq!(act.f(2.5), 2.5);
        assert_eq!(act.f(-1.0), 0.0);
        assert_eq!(act.df(2.5), 1.0);
        assert_eq!(act.df(-1.0), 0.0);
        assert_eq!(act.df(0.0), 0.0);
    }
}
