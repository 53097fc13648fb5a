//! The assignment's grading suite.
//!
//! Declaration order is report order: the file-presence gate runs first,
//! then style, student tests and coverage, then the functional output
//! checks. The two required gates mean a missing file or failing student
//! suite suppresses the downstream cascade with one clear root cause.

use rubric_harness::{CoverageOptions, ScriptRun, StudentTestOptions, Suite, TestSpec};

fn to_lower(s: String) -> String {
    s.to_lowercase()
}

pub fn assignment_suite() -> Suite {
    let mut suite = Suite::new("hello_world");

    suite.register(
        TestSpec::new("test_submitted_files", "Check submitted files").required(),
        |ctx| async move { ctx.assert_required_files_present(&["hello_world.py"]) },
    );

    suite.register(
        TestSpec::new("test_style", "Formatting checks").weight(2),
        |ctx| async move { ctx.assert_passes_style("hello_world.py").await },
    );

    suite.register(
        TestSpec::new(
            "test_passes_student_tests",
            "Submission passes student tests",
        )
        .required(),
        |ctx| async move {
            ctx.run_student_tests(StudentTestOptions::default()).await?;
            Ok(())
        },
    );

    suite.register(
        TestSpec::new("test_student_coverage", "Student test coverage")
            .weight(4)
            .required(),
        |ctx| async move {
            ctx.check_coverage(&["hello_world.py"], CoverageOptions::default())
                .await?;
            Ok(())
        },
    );

    suite.register(
        TestSpec::new("test_output_exactly", "hello_world.py output equal").weight(1),
        |ctx| async move {
            let expected = "Hello World!\n";
            ctx.assert_output_equal(ScriptRun::new("hello_world.py"), expected)
                .await?;
            ctx.print(format!("Correct output:\n{expected}"));
            Ok(())
        },
    );

    suite.register(
        TestSpec::new("test_output_not_equal", "hello_world.py output not equal").weight(1),
        |ctx| async move {
            ctx.assert_output_not_equal(ScriptRun::new("hello_world.py"), "Incorrect\n")
                .await
        },
    );

    suite.register(
        TestSpec::new("test_output_contains", "hello_world.py output contains").weight(1),
        |ctx| async move {
            ctx.assert_in_output(
                ScriptRun::new("hello_world.py").with_processor(to_lower),
                "hello",
            )
            .await
        },
    );

    suite.register(
        TestSpec::new(
            "test_output_not_containing",
            "hello_world.py output not containing",
        )
        .weight(1),
        |ctx| async move {
            ctx.assert_not_in_output(ScriptRun::new("hello_world.py"), "hola")
                .await
        },
    );

    suite
}
