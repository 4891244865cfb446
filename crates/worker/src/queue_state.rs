use scheduler_domain::{Queue, QueueView};

/// 队列定义与运行计数
#[derive(Debug, Clone)]
pub struct QueueState {
    pub definition: Queue,
    pub processing: i32,
    pub waiting: i32,
    pub launched: u64,
    pub terminated: u64,
}

impl QueueState {
    pub fn new(definition: Queue) -> Self {
        Self {
            definition,
            processing: 0,
            waiting: 0,
            launched: 0,
            terminated: 0,
        }
    }

    /// 替换定义，保留累计计数
    pub fn update_definition(&mut self, definition: Queue) {
        self.definition = definition;
    }

    pub fn reset_counts(&mut self) {
        self.processing = 0;
        self.waiting = 0;
    }

    /// 处理中与等待中的总数达到上限；max_size 为 0 时不限
    pub fn is_full(&self) -> bool {
        self.definition.max_size > 0
            && self.processing + self.waiting >= self.definition.max_size
    }

    pub fn can_launch(&self) -> bool {
        !self.definition.paused && self.processing < self.definition.slot
    }

    pub fn view(&self) -> QueueView {
        QueueView {
            id: self.definition.id,
            name: self.definition.name.clone(),
            slot: self.definition.slot,
            max_size: self.definition.max_size,
            paused: self.definition.paused,
            no_exec_while: self.definition.no_exec_while.clone(),
            processing: self.processing,
            waiting: self.waiting,
            launched: self.launched,
            terminated: self.terminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(slot: i32, max_size: i32) -> Queue {
        Queue {
            id: 3,
            name: "q".to_string(),
            slot,
            max_size,
            max_duration: 0,
            paused: false,
            paused_since: None,
            no_exec_while: vec![],
        }
    }

    #[test]
    fn test_capacity() {
        let mut state = QueueState::new(queue(1, 2));
        assert!(!state.is_full());
        assert!(state.can_launch());

        state.processing = 1;
        state.waiting = 1;
        assert!(state.is_full());
        assert!(!state.can_launch());

        let unbounded = QueueState::new(queue(1, 0));
        assert!(!unbounded.is_full());
    }

    #[test]
    fn test_paused_queue_cannot_launch() {
        let mut definition = queue(4, 0);
        definition.paused = true;
        let state = QueueState::new(definition);
        assert!(!state.can_launch());
    }

    #[test]
    fn test_update_keeps_counters() {
        let mut state = QueueState::new(queue(1, 0));
        state.launched = 5;
        state.terminated = 4;
        state.update_definition(queue(2, 10));
        assert_eq!(state.definition.slot, 2);
        assert_eq!(state.launched, 5);
        assert_eq!(state.terminated, 4);
    }
}
