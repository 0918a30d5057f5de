// Fair-ordering tests against the public queue API

#[cfg(test)]
mod tests {
    use fairio::{FairQueue, FairQueueConfig, IoFuture, Request, RequestType};

    fn config(max_req_count: u64, max_bytes_count: u64) -> FairQueueConfig {
        FairQueueConfig {
            max_req_count,
            max_bytes_count,
            tau: 100_000.0,
        }
    }

    // The tag travels in the raw request size, which never enters costing.
    fn tagged(tag: u64, weight: u64, size: u64) -> (Request, IoFuture) {
        Request::new(RequestType::Read, tag, weight, size, Box::new(|| {}))
    }

    #[test]
    fn drains_mixed_weights_in_fair_order() {
        let fq = FairQueue::new(config(2, 1), 10);
        fq.register_priority_class("a", 1);
        fq.register_priority_class("b", 2);
        fq.register_priority_class("c", 3);

        let jobs = [
            ("a", 11, 3, 20),
            ("a", 12, 2, 20),
            ("a", 13, 1, 20),
            ("b", 21, 3, 10),
            ("b", 22, 3, 10),
            ("b", 23, 3, 10),
            ("c", 31, 4, 1),
            ("c", 32, 2, 1),
            ("c", 33, 4, 1),
        ];
        let mut futures = Vec::new();
        for (class, tag, weight, size) in jobs {
            let (req, future) = tagged(tag, weight, size);
            fq.enqueue(class, req).unwrap();
            futures.push(future);
        }

        let mut order = Vec::new();
        loop {
            let (req, empty) = fq.dequeue();
            if let Some(req) = req {
                order.push(req.request_size());
            }
            if empty {
                break;
            }
        }

        // One round at equal zero cost in registration order, then the queue
        // keeps picking the cheapest accumulated class: "c" requests are
        // nearly free, "a" requests are heavyweight singles.
        assert_eq!(order, vec![11, 21, 31, 32, 33, 22, 23, 12, 13]);
    }

    #[test]
    fn share_update_shifts_the_service_ratio() {
        let fq = FairQueue::new(config(1, 1), 10);
        fq.register_priority_class("a", 1);
        fq.register_priority_class("b", 1);

        let mut futures = Vec::new();
        for _ in 0..150 {
            for (class, tag) in [("a", 1), ("b", 2)] {
                let (req, future) = tagged(tag, 1, 1);
                fq.enqueue(class, req).unwrap();
                futures.push(future);
            }
        }

        // Equal shares serve strictly alternately.
        let mut served = [0u32; 2];
        for _ in 0..100 {
            let (req, _) = fq.dequeue();
            served[req.unwrap().request_size() as usize - 1] += 1;
        }
        assert_eq!(served, [50, 50]);

        // Tripling b's shares cuts its per-request charge to a third, so b
        // drains about three times faster from here on.
        fq.update_shares("b", 3).unwrap();
        let mut served = [0u32; 2];
        loop {
            let (req, empty) = fq.dequeue();
            if let Some(req) = req {
                served[req.request_size() as usize - 1] += 1;
            }
            if served[1] == 100 || empty {
                break;
            }
        }
        assert_eq!(served[1], 100, "boosted class should drain first");
        assert!(
            (20..=50).contains(&served[0]),
            "a served {} times against b's 100",
            served[0]
        );
    }

    #[test]
    fn queue_size_tracks_the_backlog() {
        let fq = FairQueue::new(config(1, 1), 10);
        fq.register_priority_class("a", 1);
        fq.register_priority_class("b", 1);

        let mut futures = Vec::new();
        for (class, tag) in [("a", 1), ("a", 2), ("b", 3)] {
            let (req, future) = tagged(tag, 1, 1);
            let depth = fq.enqueue(class, req).unwrap();
            assert_eq!(depth as u64, tag);
            futures.push(future);
        }

        for remaining in [2, 1, 0] {
            let (req, empty) = fq.dequeue();
            assert!(req.is_some());
            assert_eq!(fq.size(), remaining);
            assert_eq!(empty, remaining == 0);
        }
    }
}
