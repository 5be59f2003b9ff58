// Derivative-free minimisation with the Nelder-Mead simplex method, restarted around the
// best vertex until a fresh simplex stops improving.

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

pub(crate) struct NelderMead {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub max_restarts: usize,
    pub initial_step: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

struct Run {
    x: Vec<f64>,
    value: f64,
    iterations: usize,
    converged: bool,
}

impl NelderMead {
    pub fn minimize(&self, f: impl Fn(&[f64]) -> f64, x0: &[f64]) -> Minimum {
        // NaN never wins a comparison, so map it to the worst possible value
        let eval = |x: &[f64]| {
            let v = f(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };
        let mut best = x0.to_vec();
        let mut best_value = eval(&best);
        let mut iterations = 0;
        for restart in 0..=self.max_restarts {
            let run = self.run(&eval, &best, self.max_iterations - iterations);
            iterations += run.iterations;
            let improvement = best_value - run.value;
            if run.value <= best_value {
                best = run.x;
                best_value = run.value;
            }
            if !run.converged {
                // a restart that runs out of budget keeps the earlier converged answer
                return Minimum {
                    x: best,
                    value: best_value,
                    iterations,
                    converged: restart > 0,
                };
            }
            if restart > 0 && improvement <= self.tolerance * (1.0 + best_value.abs()) {
                break;
            }
        }
        Minimum {
            x: best,
            value: best_value,
            iterations,
            converged: true,
        }
    }

    fn run(&self, eval: &impl Fn(&[f64]) -> f64, x0: &[f64], budget: usize) -> Run {
        let n = x0.len();
        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
        simplex.push((x0.to_vec(), eval(x0)));
        for i in 0..n {
            let mut x = x0.to_vec();
            x[i] += self.initial_step;
            let v = eval(&x);
            simplex.push((x, v));
        }

        for iteration in 0..budget {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            if self.has_converged(&simplex) {
                let (x, value) = simplex.swap_remove(0);
                return Run {
                    x,
                    value,
                    iterations: iteration,
                    converged: true,
                };
            }

            let centroid: Vec<f64> = (0..n)
                .map(|j| simplex[..n].iter().map(|(x, _)| x[j]).sum::<f64>() / n as f64)
                .collect();
            let worst_value = simplex[n].1;
            let toward = |coef: f64| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(&simplex[n].0)
                    .map(|(c, w)| c + coef * (w - c))
                    .collect()
            };

            let reflected = toward(-REFLECTION);
            let reflected_value = eval(&reflected);
            let replacement = if reflected_value < simplex[0].1 {
                let expanded = toward(-REFLECTION * EXPANSION);
                let expanded_value = eval(&expanded);
                if expanded_value < reflected_value {
                    Some((expanded, expanded_value))
                } else {
                    Some((reflected, reflected_value))
                }
            } else if reflected_value < simplex[n - 1].1 {
                Some((reflected, reflected_value))
            } else if reflected_value < worst_value {
                let outside = toward(-REFLECTION * CONTRACTION);
                let outside_value = eval(&outside);
                (outside_value <= reflected_value).then_some((outside, outside_value))
            } else {
                let inside = toward(CONTRACTION);
                let inside_value = eval(&inside);
                (inside_value < worst_value).then_some((inside, inside_value))
            };

            match replacement {
                Some(vertex) => simplex[n] = vertex,
                None => {
                    let best = simplex[0].0.clone();
                    for (x, v) in simplex.iter_mut().skip(1) {
                        for (xj, bj) in x.iter_mut().zip(&best) {
                            *xj = bj + SHRINK * (*xj - bj);
                        }
                        *v = eval(x);
                    }
                }
            }
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (x, value) = simplex.swap_remove(0);
        Run {
            x,
            value,
            iterations: budget,
            converged: false,
        }
    }

    fn has_converged(&self, sorted: &[(Vec<f64>, f64)]) -> bool {
        let (best, best_value) = &sorted[0];
        let spread = sorted[sorted.len() - 1].1 - best_value;
        if !(spread <= self.tolerance * (1.0 + best_value.abs())) {
            return false;
        }
        let x_tolerance = self.tolerance.sqrt();
        sorted[1..].iter().all(|(x, _)| {
            x.iter()
                .zip(best)
                .all(|(a, b)| (a - b).abs() <= x_tolerance * (1.0 + b.abs()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> NelderMead {
        NelderMead {
            max_iterations: 10_000,
            tolerance: 1e-12,
            max_restarts: 3,
            initial_step: 0.5,
        }
    }

    #[test]
    fn quadratic_bowl() {
        let min = solver().minimize(
            |x| (x[0] - 3.0).powi(2) + 10.0 * (x[1] + 1.0).powi(2),
            &[0.0, 0.0],
        );
        assert!(min.converged);
        assert!((min.x[0] - 3.0).abs() < 1e-4);
        assert!((min.x[1] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn rosenbrock() {
        let min = solver().minimize(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            &[-1.2, 1.0],
        );
        assert!(min.converged);
        assert!((min.x[0] - 1.0).abs() < 1e-3);
        assert!((min.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn iteration_budget() {
        let min = NelderMead {
            max_iterations: 5,
            ..solver()
        }
        .minimize(|x| x.iter().map(|v| v * v).sum(), &[10.0, -4.0, 7.0]);
        assert!(!min.converged);
        assert_eq!(min.iterations, 5);
    }

    #[test]
    fn nan_is_avoided() {
        let min = solver().minimize(
            |x| if x[0] < 0.0 { f64::NAN } else { (x[0] - 1.0).powi(2) },
            &[2.0],
        );
        assert!(min.converged);
        assert!((min.x[0] - 1.0).abs() < 1e-4);
    }
}
