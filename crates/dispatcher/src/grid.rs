use diagnosis_domain::{Cell, CellId, Job, JobId};

/// All cells of one job, in brand, model, question order.
#[derive(Debug, Clone)]
pub struct JobGrid {
    job_id: JobId,
    cells: Vec<Cell>,
}

impl JobGrid {
    /// Expects the job's dimensions to be normalized already, so every
    /// `CellId` is unique.
    pub fn build(job: &Job) -> Self {
        let mut cells = Vec::with_capacity(job.total_cells);
        for brand in &job.brands {
            for model in &job.models {
                for (index, question) in job.questions.iter().enumerate() {
                    cells.push(Cell::new(
                        job.job_id.clone(),
                        CellId::new(brand.as_str(), model.as_str(), index),
                        question.as_str(),
                    ));
                }
            }
        }
        Self {
            job_id: job.job_id.clone(),
            cells,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnosis_domain::{CellState, JobRequest};

    #[test]
    fn test_grid_covers_every_combination_in_order() {
        let request = JobRequest::new(["Acme", "Globex"], ["deepseek", "qwen"], ["q1", "q2", "q3"])
            .normalized()
            .unwrap();
        let job = Job::new(JobId::from("job-1"), request);

        let grid = JobGrid::build(&job);

        assert_eq!(grid.len(), 12);
        assert_eq!(grid.len(), job.total_cells);
        assert!(grid.cells().iter().all(|c| c.state == CellState::Pending));
        assert_eq!(grid.cells()[0].id, CellId::new("Acme", "deepseek", 0));
        assert_eq!(grid.cells()[3].id, CellId::new("Acme", "qwen", 0));
        assert_eq!(grid.cells()[11].id, CellId::new("Globex", "qwen", 2));
        assert_eq!(grid.cells()[2].question, "q3");
    }
}
