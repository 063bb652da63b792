use std::cmp::Ordering;

/// A total order over `T`, supplied to [`MinHeap`] and the sorters so that
/// an ordering can borrow external state (e.g. the protein store)
pub trait Compare<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

/// Order by `T: Ord`
#[derive(Copy, Clone, Debug, Default)]
pub struct Natural;

impl<T: Ord> Compare<T> for Natural {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

impl<T, C: Compare<T>> Compare<T> for &C {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (**self).compare(a, b)
    }
}

/// Binary min-heap over a flat vector, generic over the comparator. Used by
/// every k-way merge in the pipeline
pub struct MinHeap<T, C> {
    data: Vec<T>,
    cmp: C,
}

impl<T, C: Compare<T>> MinHeap<T, C> {
    pub fn new(cmp: C) -> Self {
        Self::with_capacity(0, cmp)
    }

    pub fn with_capacity(capacity: usize, cmp: C) -> Self {
        MinHeap {
            data: Vec::with_capacity(capacity),
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, item: T) {
        self.data.push(item);
        let last = self.data.len() - 1;
        sift_up(&mut self.data, &self.cmp, last);
        debug_assert!(check_heap(&self.data, &self.cmp));
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let last = self.data.len() - 1;
        self.data.swap(0, last);
        let item = self.data.pop();
        sift_down(&mut self.data, &self.cmp, 0);
        debug_assert!(check_heap(&self.data, &self.cmp));
        item
    }

    pub fn comparator(&self) -> &C {
        &self.cmp
    }
}

fn check_heap<T, C: Compare<T>>(slice: &[T], cmp: &C) -> bool {
    for i in 1..slice.len() {
        let parent = (i - 1) / 2;
        if cmp.compare(&slice[parent], &slice[i]) == Ordering::Greater {
            return false;
        }
    }
    true
}

fn sift_up<T, C: Compare<T>>(slice: &mut [T], cmp: &C, mut index: usize) {
    while index > 0 {
        let parent = (index - 1) / 2;
        if cmp.compare(&slice[index], &slice[parent]) == Ordering::Less {
            slice.swap(index, parent);
            index = parent;
        } else {
            break;
        }
    }
}

fn sift_down<T, C: Compare<T>>(slice: &mut [T], cmp: &C, mut index: usize) {
    while let Some(left) = slice.get(index * 2 + 1) {
        let mut smallest = index;
        if cmp.compare(left, &slice[smallest]) == Ordering::Less {
            smallest = index * 2 + 1;
        }

        if let Some(right) = slice.get(index * 2 + 2) {
            if cmp.compare(right, &slice[smallest]) == Ordering::Less {
                smallest = index * 2 + 2;
            }
        }

        if smallest != index {
            slice.swap(smallest, index);
            index = smallest;
        } else {
            break;
        }
    }
}
