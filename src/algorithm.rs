mod astar;

pub(crate) use astar::a_star_search;

use std::collections::HashMap;

use crate::common::{Cell, Path};

type Trace = HashMap<(Cell, usize), (Cell, usize)>;

fn construct_path(trace: &Trace, mut current: (Cell, usize)) -> Path {
    let mut path = vec![current.0];
    while let Some(&(pos, time)) = trace.get(&current) {
        path.push(pos);
        current = (pos, time);
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_path_follows_trace() {
        let mut trace = Trace::new();
        trace.insert(((0, 1), 1), ((0, 0), 0));
        trace.insert(((0, 1), 2), ((0, 1), 1));
        trace.insert(((1, 1), 3), ((0, 1), 2));

        assert_eq!(
            construct_path(&trace, ((1, 1), 3)),
            vec![(0, 0), (0, 1), (0, 1), (1, 1)]
        );
        assert_eq!(construct_path(&trace, ((5, 5), 0)), vec![(5, 5)]);
    }
}
