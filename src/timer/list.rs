//! # Lista Ordenada de Timers
//! src/timer/list.rs
//!
//! Lista doblemente enlazada en orden ascendente de expiración. Los nodos
//! viven en un arena (`Vec`) y se enlazan por índice, así que borrar un nodo
//! es O(1) dado su handle y nunca quedan punteros colgantes: un slot libre
//! incrementa su generación y los handles viejos dejan de ser válidos.
//!
//! ```text
//! head                                              tail
//!  [t=3] <-> [t=5] <-> [t=5] <-> [t=9] <-> ... <-> [t=42]
//! ```
//!
//! - `insert`: O(1) si es el más próximo a expirar, si no un recorrido desde
//!   la cabeza.
//! - `adjust`: re-posiciona un timer cuya expiración cambió; cuando avanza
//!   (el caso común) el recorrido empieza en su sucesor, no en la cabeza.
//! - `remove`: O(1).
//! - `sweep`: O(k) para los k timers vencidos; se detiene en el primero que
//!   no venció.

use std::time::Instant;

/// Handle estable a un timer de la lista
///
/// Incluye la generación del slot, por lo que un handle de un timer ya
/// borrado nunca apunta al timer que luego reutilice ese slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node<T> {
    expire: Instant,
    data: T,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    node: Option<Node<T>>,
}

/// Lista de timers ordenada por expiración
#[derive(Debug)]
pub struct TimerList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerList<T> {
    /// Crea una lista vacía
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Crea una lista con espacio reservado para `capacity` timers
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            ..Self::new()
        }
    }

    /// Número de timers activos
    pub fn len(&self) -> usize {
        self.len
    }

    /// Verifica si la lista está vacía
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Expiración del timer más próximo
    pub fn next_expiry(&self) -> Option<Instant> {
        self.head.map(|idx| self.node(idx).expire)
    }

    /// Verifica si el handle sigue apuntando a un timer vivo
    pub fn contains(&self, id: TimerId) -> bool {
        self.resolve(id).is_some()
    }

    /// Datos asociados a un timer
    pub fn get(&self, id: TimerId) -> Option<&T> {
        self.resolve(id).map(|idx| &self.node(idx).data)
    }

    /// Inserta un timer nuevo y retorna su handle
    pub fn insert(&mut self, expire: Instant, data: T) -> TimerId {
        let node = Node {
            expire,
            data,
            prev: None,
            next: None,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                self.slots.len() - 1
            }
        };

        self.len += 1;
        self.link(index);

        TimerId {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Cambia la expiración de un timer y lo re-posiciona
    ///
    /// Retorna `false` si el handle ya no es válido.
    pub fn adjust(&mut self, id: TimerId, expire: Instant) -> bool {
        let Some(idx) = self.resolve(id) else {
            return false;
        };

        self.node_mut(idx).expire = expire;
        let prev = self.node(idx).prev;
        let next = self.node(idx).next;

        // Retrocedió: puede que ya no vaya después de su antecesor
        if let Some(prev) = prev {
            if self.node(prev).expire > expire {
                self.unlink(idx);
                self.link(idx);
                return true;
            }
        }

        match next {
            // Sigue siendo menor que su sucesor: no hay que moverlo
            None => {}
            Some(next) if self.node(next).expire > expire => {}
            Some(next) => {
                self.unlink(idx);
                self.link_after(idx, next);
            }
        }

        true
    }

    /// Borra un timer y retorna sus datos
    pub fn remove(&mut self, id: TimerId) -> Option<T> {
        let idx = self.resolve(id)?;
        Some(self.release(idx))
    }

    /// Borra y entrega a `on_expire` cada timer con expiración `<= now`
    ///
    /// Retorna cuántos timers vencieron.
    pub fn sweep<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(T),
    {
        let mut expired = 0;

        while let Some(head) = self.head {
            // Lista ordenada: si la cabeza no venció, ninguno venció
            if self.node(head).expire > now {
                break;
            }
            let data = self.release(head);
            on_expire(data);
            expired += 1;
        }

        expired
    }

    /// Recorre los timers de la cabeza a la cola
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    // === Manejo interno del arena ===

    fn resolve(&self, id: TimerId) -> Option<usize> {
        let slot = self.slots.get(id.index)?;
        if slot.generation == id.generation && slot.node.is_some() {
            Some(id.index)
        } else {
            None
        }
    }

    fn node(&self, idx: usize) -> &Node<T> {
        self.slots[idx]
            .node
            .as_ref()
            .expect("linked timer slot must be occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<T> {
        self.slots[idx]
            .node
            .as_mut()
            .expect("linked timer slot must be occupied")
    }

    /// Desenlaza, libera el slot y retorna los datos
    fn release(&mut self, idx: usize) -> T {
        self.unlink(idx);

        let slot = &mut self.slots[idx];
        let node = slot.node.take().expect("released timer slot must be occupied");
        slot.generation = slot.generation.wrapping_add(1);

        self.free.push(idx);
        self.len -= 1;
        node.data
    }

    /// Enlaza un nodo suelto en su posición ordenada
    fn link(&mut self, idx: usize) {
        let expire = self.node(idx).expire;

        match self.head {
            None => {
                self.head = Some(idx);
                self.tail = Some(idx);
            }
            Some(head) if expire < self.node(head).expire => {
                let node = self.node_mut(idx);
                node.prev = None;
                node.next = Some(head);
                self.node_mut(head).prev = Some(idx);
                self.head = Some(idx);
            }
            Some(head) => self.link_after(idx, head),
        }
    }

    /// Enlaza `idx` recorriendo desde `start`
    ///
    /// Requiere que `start` esté enlazado y no expire después de `idx`.
    fn link_after(&mut self, idx: usize, start: usize) {
        let expire = self.node(idx).expire;
        let mut prev = start;
        let mut cursor = self.node(start).next;

        while let Some(current) = cursor {
            if self.node(current).expire > expire {
                break;
            }
            prev = current;
            cursor = self.node(current).next;
        }

        {
            let node = self.node_mut(idx);
            node.prev = Some(prev);
            node.next = cursor;
        }
        self.node_mut(prev).next = Some(idx);

        match cursor {
            Some(next) => self.node_mut(next).prev = Some(idx),
            None => self.tail = Some(idx),
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node_mut(idx);
            (node.prev.take(), node.next.take())
        };

        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }
}

/// Iterador en orden de expiración
pub struct Iter<'a, T> {
    list: &'a TimerList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Instant, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.list.node(idx);
        self.cursor = node.next;
        Some((node.expire, &node.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    fn expiries<T>(list: &TimerList<T>, base: Instant) -> Vec<u64> {
        list.iter()
            .map(|(expire, _)| expire.duration_since(base).as_secs())
            .collect()
    }

    fn is_sorted(values: &[u64]) -> bool {
        values.windows(2).all(|w| w[0] <= w[1])
    }

    #[test]
    fn test_insert_keeps_order() {
        let base = Instant::now();
        let mut list = TimerList::new();

        list.insert(at(base, 5), "b");
        list.insert(at(base, 9), "d");
        list.insert(at(base, 1), "a");
        list.insert(at(base, 7), "c");

        assert_eq!(expiries(&list, base), vec![1, 5, 7, 9]);
        assert_eq!(list.len(), 4);
        assert_eq!(list.next_expiry(), Some(at(base, 1)));
    }

    #[test]
    fn test_with_capacity_reuses_freed_slots() {
        let base = Instant::now();
        let mut list = TimerList::with_capacity(4);
        assert!(list.slots.capacity() >= 4);
        assert!(list.is_empty());

        let a = list.insert(at(base, 1), 'a');
        list.insert(at(base, 2), 'b');
        list.remove(a);
        let c = list.insert(at(base, 3), 'c');

        // El slot liberado se reutiliza con otra generación
        assert_eq!(list.slots.len(), 2);
        assert!(!list.contains(a));
        assert_eq!(list.get(c), Some(&'c'));
        assert_eq!(expiries(&list, base), vec![2, 3]);
    }

    #[test]
    fn test_remove_head_tail_and_middle() {
        let base = Instant::now();
        let mut list = TimerList::new();

        let a = list.insert(at(base, 1), 'a');
        let b = list.insert(at(base, 2), 'b');
        let c = list.insert(at(base, 3), 'c');
        let d = list.insert(at(base, 4), 'd');

        assert_eq!(list.remove(b), Some('b'));
        assert_eq!(expiries(&list, base), vec![1, 3, 4]);

        assert_eq!(list.remove(a), Some('a'));
        assert_eq!(expiries(&list, base), vec![3, 4]);

        assert_eq!(list.remove(d), Some('d'));
        assert_eq!(expiries(&list, base), vec![3]);

        assert_eq!(list.remove(c), Some('c'));
        assert!(list.is_empty());
        assert_eq!(list.next_expiry(), None);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let base = Instant::now();
        let mut list = TimerList::new();

        let old = list.insert(at(base, 1), 1);
        list.remove(old);
        // El slot se reutiliza con otra generación
        let new = list.insert(at(base, 2), 2);

        assert!(!list.contains(old));
        assert_eq!(list.remove(old), None);
        assert!(!list.adjust(old, at(base, 10)));
        assert_eq!(list.get(new), Some(&2));
    }

    #[test]
    fn test_adjust_forward_moves_after_successors() {
        let base = Instant::now();
        let mut list = TimerList::new();

        let first = list.insert(at(base, 1), "first");
        list.insert(at(base, 2), "second");
        list.insert(at(base, 3), "third");

        assert!(list.adjust(first, at(base, 10)));

        let order: Vec<_> = list.iter().map(|(_, data)| *data).collect();
        assert_eq!(order, vec!["second", "third", "first"]);
        assert_eq!(expiries(&list, base), vec![2, 3, 10]);
    }

    #[test]
    fn test_adjust_within_gap_stays_in_place() {
        let base = Instant::now();
        let mut list = TimerList::new();

        list.insert(at(base, 1), 'a');
        let b = list.insert(at(base, 2), 'b');
        list.insert(at(base, 9), 'c');

        list.adjust(b, at(base, 5));

        let order: Vec<_> = list.iter().map(|(_, data)| *data).collect();
        assert_eq!(order, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_adjust_backward_relinks() {
        let base = Instant::now();
        let mut list = TimerList::new();

        list.insert(at(base, 4), 'a');
        list.insert(at(base, 6), 'b');
        let c = list.insert(at(base, 8), 'c');

        list.adjust(c, at(base, 1));

        assert_eq!(expiries(&list, base), vec![1, 4, 6]);
        assert_eq!(list.next_expiry(), Some(at(base, 1)));
    }

    #[test]
    fn test_sweep_removes_expired_prefix() {
        let base = Instant::now();
        let mut list = TimerList::new();

        for secs in [3, 1, 4, 1, 5, 9, 2, 6] {
            list.insert(at(base, secs), secs);
        }

        let mut fired = Vec::new();
        let count = list.sweep(at(base, 4), |data| fired.push(data));

        assert_eq!(count, 5);
        assert_eq!(fired, vec![1, 1, 2, 3, 4]);
        assert_eq!(expiries(&list, base), vec![5, 6, 9]);
    }

    #[test]
    fn test_sweep_on_empty_list() {
        let mut list: TimerList<()> = TimerList::new();
        assert_eq!(list.sweep(Instant::now(), |_| panic!("nothing to fire")), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u64),
        Adjust(usize, u64),
        Remove(usize),
        Sweep(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u64..100).prop_map(Op::Insert),
            2 => (any::<usize>(), 0u64..100).prop_map(|(i, t)| Op::Adjust(i, t)),
            1 => any::<usize>().prop_map(Op::Remove),
            1 => (0u64..100).prop_map(Op::Sweep),
        ]
    }

    proptest! {
        #[test]
        fn prop_list_stays_sorted(ops in proptest::collection::vec(op_strategy(), 1..200)) {
            let base = Instant::now();
            let mut list = TimerList::new();
            let mut live: Vec<TimerId> = Vec::new();

            for op in ops {
                match op {
                    Op::Insert(t) => live.push(list.insert(at(base, t), t)),
                    Op::Adjust(i, t) if !live.is_empty() => {
                        let id = live[i % live.len()];
                        prop_assert!(list.adjust(id, at(base, t)));
                    }
                    Op::Remove(i) if !live.is_empty() => {
                        let id = live.swap_remove(i % live.len());
                        prop_assert!(list.remove(id).is_some());
                    }
                    Op::Sweep(t) => {
                        let before = expiries(&list, base);
                        let expected = before.iter().filter(|&&e| e <= t).count();

                        list.sweep(at(base, t), |_| {});

                        let after = expiries(&list, base);
                        prop_assert_eq!(after.as_slice(), &before[expected..]);
                        live.retain(|id| list.contains(*id));
                    }
                    _ => {}
                }

                let current = expiries(&list, base);
                prop_assert!(is_sorted(&current));
                prop_assert_eq!(current.len(), list.len());
                prop_assert_eq!(live.len(), list.len());
            }
        }
    }
}
